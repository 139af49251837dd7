//! On-disk layout of a run: one `response_{id}_{fingerprint}.json` per item,
//! the cumulative `summary.json`, and optional raw replies under `raw/`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ArtifactError;

const SUMMARY_FILE: &str = "summary.json";
const ARTIFACT_PREFIX: &str = "response_";
const RAW_PREFIX: &str = "raw_response_";
const ARTIFACT_SUFFIX: &str = ".json";

/// One processed prompt. Field aliases accept summaries written with the
/// older `prompt` / `response` / `output_file` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub prompt_id: usize,
    #[serde(alias = "prompt")]
    pub prompt_content: String,
    #[serde(alias = "response")]
    pub response_text: String,
    #[serde(default)]
    pub response_is_structured: bool,
    #[serde(alias = "output_file")]
    pub artifact_path: String,
}

pub struct ArtifactStore {
    output_dir: PathBuf,
    raw_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>, raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            raw_dir: raw_dir.into(),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }

    pub fn artifact_path(&self, prompt_id: usize, fingerprint: &str) -> PathBuf {
        self.output_dir
            .join(format!("{ARTIFACT_PREFIX}{prompt_id}_{fingerprint}{ARTIFACT_SUFFIX}"))
    }

    pub fn raw_path(&self, prompt_id: usize, fingerprint: &str) -> PathBuf {
        self.raw_dir
            .join(format!("{RAW_PREFIX}{prompt_id}_{fingerprint}{ARTIFACT_SUFFIX}"))
    }

    /// Create the output directory, and the raw directory when raw capture is on.
    pub async fn prepare(&self, with_raw: bool) -> Result<(), ArtifactError> {
        create_dir(&self.output_dir).await?;
        if with_raw {
            create_dir(&self.raw_dir).await?;
        }
        Ok(())
    }

    /// Existing artifacts keyed by the fingerprint in their file name. When
    /// several share a fingerprint the one with the lowest prompt id wins.
    pub async fn scan(&self) -> HashMap<String, PathBuf> {
        let mut best: HashMap<String, (usize, PathBuf)> = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(e) => e,
            Err(_) => return HashMap::new(),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => {}
                _ => continue,
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((prompt_id, fingerprint)) = parse_artifact_name(name) else {
                continue;
            };
            if matches!(best.get(fingerprint), Some((id, _)) if *id <= prompt_id) {
                continue;
            }
            best.insert(fingerprint.to_string(), (prompt_id, path.clone()));
        }

        let found: HashMap<String, PathBuf> = best
            .into_iter()
            .map(|(fingerprint, (_, path))| (fingerprint, path))
            .collect();

        info!(
            "Found {} existing response artifacts in {}",
            found.len(),
            self.output_dir.display()
        );
        found
    }

    pub async fn read_artifact(&self, path: &Path) -> Result<String, ArtifactError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ArtifactError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn write_artifact(&self, path: &Path, body: &str) -> Result<(), ArtifactError> {
        write_atomic(path, body.as_bytes()).await?;
        debug!(path = %path.display(), "Saved response artifact");
        Ok(())
    }

    pub async fn write_raw(
        &self,
        prompt_id: usize,
        fingerprint: &str,
        raw: &serde_json::Value,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.raw_path(prompt_id, fingerprint);
        let body = serde_json::to_string_pretty(raw).map_err(|source| ArtifactError::Serialize {
            what: "raw reply",
            source,
        })?;
        write_atomic(&path, body.as_bytes()).await?;
        debug!(path = %path.display(), "Saved raw reply");
        Ok(path)
    }

    /// Previous run's records. A missing file is an empty summary; an
    /// unreadable one is logged and treated the same way.
    pub async fn load_summary(&self) -> Vec<ResponseRecord> {
        let path = self.summary_path();
        if !path.exists() {
            return Vec::new();
        }
        match read_summary(&path).await {
            Ok(records) => {
                info!("Loaded existing summary with {} records", records.len());
                records
            }
            Err(e) => {
                warn!("Ignoring unreadable summary {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace `summary.json` in one step.
    pub async fn save_summary(&self, records: &[ResponseRecord]) -> Result<(), ArtifactError> {
        let path = self.summary_path();
        let body = serde_json::to_string_pretty(records).map_err(|source| {
            ArtifactError::Serialize {
                what: "run summary",
                source,
            }
        })?;

        write_atomic(&path, body.as_bytes()).await?;
        debug!(records = records.len(), "Saved summary");
        Ok(())
    }
}

/// Read a summary file from any location.
pub async fn read_summary(path: &Path) -> Result<Vec<ResponseRecord>, ArtifactError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&data).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `response_{id}_{fingerprint}.json` -> `(id, fingerprint)`.
fn parse_artifact_name(name: &str) -> Option<(usize, &str)> {
    let stem = name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?;
    let (id, fingerprint) = stem.split_once('_')?;
    if fingerprint.is_empty() || fingerprint.contains('.') {
        return None;
    }
    Some((id.parse().ok()?, fingerprint))
}

async fn create_dir(path: &Path) -> Result<(), ArtifactError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ArtifactError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a sibling `<name>.tmp`, then rename it over `path`. A crash leaves
/// either the old file or the temp file, never a partial file under `path`.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), ArtifactError> {
    let tmp = temp_path(path);
    let written = match tokio::fs::write(&tmp, body).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    written.map_err(|source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path(), dir.path().join("raw"))
    }

    fn record(id: usize) -> ResponseRecord {
        ResponseRecord {
            prompt_id: id,
            prompt_content: format!("prompt {id}"),
            response_text: "{\n  \"has_command\": true\n}".into(),
            response_is_structured: true,
            artifact_path: format!("response_{id}_abc.json"),
        }
    }

    #[test]
    fn test_parse_artifact_name() {
        assert_eq!(
            parse_artifact_name("response_12_0123abcd.json"),
            Some((12, "0123abcd"))
        );
        assert_eq!(parse_artifact_name("summary.json"), None);
        assert_eq!(parse_artifact_name("response_x_abc.json"), None);
        assert_eq!(parse_artifact_name("response_3_.json"), None);
        assert_eq!(parse_artifact_name("response_3_abc.json.tmp"), None);
        assert_eq!(parse_artifact_name("raw_response_1_abc.json"), None);
    }

    #[tokio::test]
    async fn test_scan_keys_by_fingerprint() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.prepare(true).await.unwrap();

        let path = store.artifact_path(1, "deadbeef");
        store.write_artifact(&path, "{}").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        store
            .write_raw(1, "deadbeef", &serde_json::json!({"done": true}))
            .await
            .unwrap();

        let found = store.scan().await;
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("deadbeef"), Some(&path));
    }

    #[tokio::test]
    async fn test_scan_prefers_lowest_prompt_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.prepare(false).await.unwrap();

        for id in [10, 2, 7] {
            let path = store.artifact_path(id, "deadbeef");
            store.write_artifact(&path, "{}").await.unwrap();
        }

        let found = store.scan().await;
        assert_eq!(found.get("deadbeef"), Some(&store.artifact_path(2, "deadbeef")));
    }

    #[tokio::test]
    async fn test_scan_skips_interrupted_writes_and_dirs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.prepare(false).await.unwrap();

        std::fs::write(dir.path().join("response_1_deadbeef.json.tmp"), "{\n  \"has_com").unwrap();
        std::fs::create_dir(dir.path().join("response_2_cafebabe.json")).unwrap();

        assert!(store.scan().await.is_empty());
    }

    #[tokio::test]
    async fn test_artifact_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.prepare(true).await.unwrap();

        let path = store.artifact_path(1, "deadbeef");
        std::fs::write(temp_path(&path), "stale").unwrap();
        store.write_artifact(&path, "{\"has_command\": true}").await.unwrap();
        let raw = store
            .write_raw(1, "deadbeef", &serde_json::json!({"done": true}))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"has_command\": true}");
        assert!(!temp_path(&path).exists());
        assert!(raw.exists());
        assert!(!temp_path(&raw).exists());
    }

    #[test]
    fn test_temp_path_is_not_an_artifact_name() {
        let tmp = temp_path(Path::new("outputs/response_1_abc.json"));
        assert_eq!(tmp, Path::new("outputs/response_1_abc.json.tmp"));
        let name = tmp.file_name().and_then(|n| n.to_str()).unwrap();
        assert_eq!(parse_artifact_name(name), None);
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("absent"), dir.path().join("raw"));
        assert!(store.scan().await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_roundtrip_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.prepare(false).await.unwrap();

        let records = vec![record(1), record(3)];
        store.save_summary(&records).await.unwrap();
        assert_eq!(store.load_summary().await, records);
        assert!(!dir.path().join("summary.json.tmp").exists());
        assert!(!dir.path().join("raw").exists());
    }

    #[tokio::test]
    async fn test_load_summary_accepts_legacy_keys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(
            store.summary_path(),
            r#"[{"prompt_id": 2, "prompt": "打开客厅的灯。", "response": "{}", "output_file": "outputs/response_2_ab.json"}]"#,
        )
        .unwrap();

        let records = store.load_summary().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt_content, "打开客厅的灯。");
        assert_eq!(records[0].artifact_path, "outputs/response_2_ab.json");
        assert!(!records[0].response_is_structured);
    }

    #[tokio::test]
    async fn test_corrupt_summary_is_ignored_on_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.summary_path(), "[{truncated").unwrap();
        assert!(store.load_summary().await.is_empty());
        assert!(matches!(
            read_summary(&store.summary_path()).await,
            Err(ArtifactError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_into_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("nope"), dir.path().join("raw"));
        let err = store.save_summary(&[record(1)]).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Write { .. }));
    }
}
