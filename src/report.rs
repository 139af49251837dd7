use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ArtifactError;
use crate::evaluation::scorer::{Evaluation, ScoredRecord, Scores};
use crate::metrics::MetricsSnapshot;

pub const REPORT_FILE: &str = "report.json";

/// Data handed to the HTML report renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub summary: Vec<ScoredRecord>,
    pub metrics: Scores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<MetricsSnapshot>,
}

impl Report {
    pub fn new(model: impl Into<String>, evaluation: Evaluation) -> Self {
        Self {
            generated_at: Utc::now(),
            model: model.into(),
            summary: evaluation.samples,
            metrics: evaluation.scores,
            run: None,
        }
    }

    pub fn with_run_metrics(mut self, run: MetricsSnapshot) -> Self {
        self.run = Some(run);
        self
    }

    pub async fn write(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let path = dir.join(REPORT_FILE);
        let body = serde_json::to_string_pretty(self).map_err(|source| ArtifactError::Serialize {
            what: "report",
            source,
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
        info!("Report data written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ResponseRecord;
    use crate::evaluation::evaluate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_report_shape() {
        let records = vec![ResponseRecord {
            prompt_id: 1,
            prompt_content: "打开客厅的灯。".into(),
            response_text: r#"{"has_command": true}"#.into(),
            response_is_structured: true,
            artifact_path: "outputs/response_1_x.json".into(),
        }];
        let report = Report::new("qwen2.5-coder:3b", evaluate(&records, None));

        let dir = TempDir::new().unwrap();
        let path = report.write(dir.path()).await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(value["model"], "qwen2.5-coder:3b");
        assert_eq!(value["summary"][0]["category"], "FP");
        assert_eq!(value["summary"][0]["source"], "DEFAULT");
        assert_eq!(value["metrics"]["confusion_matrix"]["FP"], 1);
        assert_eq!(value["metrics"]["total_count"], 1);
        assert!(value["generated_at"].is_string());
        assert!(value.get("run").is_none());
    }
}
