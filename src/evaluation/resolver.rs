use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dataset::ReferenceDataset;
use super::labels::{embedded_flag, extract_prediction};
use crate::batch::ResponseRecord;

/// Where a record's ground truth came from. `Default` means nothing
/// resolved and the label was assumed `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelSource {
    Embedded,
    DatasetExact,
    DatasetStructural,
    DatasetPositional,
    Default,
}

impl LabelSource {
    pub fn is_resolved(self) -> bool {
        self != LabelSource::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    TP,
    FP,
    TN,
    FN,
}

impl Category {
    pub fn classify(prediction: bool, ground_truth: bool) -> Self {
        match (prediction, ground_truth) {
            (true, true) => Category::TP,
            (true, false) => Category::FP,
            (false, false) => Category::TN,
            (false, true) => Category::FN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub prediction: bool,
    pub ground_truth: bool,
    pub source: LabelSource,
    pub category: Category,
}

/// Recover prediction and ground truth for one record. Pure: the same record
/// and dataset always give the same resolution.
pub fn resolve(record: &ResponseRecord, dataset: Option<&ReferenceDataset>) -> Resolution {
    let prediction = match extract_prediction(&record.response_text) {
        Some(p) => p,
        None => {
            warn!(
                prompt_id = record.prompt_id,
                artifact = %record.artifact_path,
                "No command flag in reply, assuming prediction false"
            );
            false
        }
    };

    let (ground_truth, source) = match ground_truth_for(record, dataset) {
        Some(found) => found,
        None => {
            warn!(
                prompt_id = record.prompt_id,
                "No ground truth found, assuming false"
            );
            (false, LabelSource::Default)
        }
    };

    let category = Category::classify(prediction, ground_truth);
    debug!(
        prompt_id = record.prompt_id,
        prediction,
        ground_truth,
        source = ?source,
        category = ?category,
        "Resolved record"
    );

    Resolution {
        prediction,
        ground_truth,
        source,
        category,
    }
}

fn ground_truth_for(
    record: &ResponseRecord,
    dataset: Option<&ReferenceDataset>,
) -> Option<(bool, LabelSource)> {
    if let Some(flag) = embedded_flag(&record.prompt_content) {
        return Some((flag, LabelSource::Embedded));
    }

    let dataset = dataset?;
    if let Some(flag) = dataset.lookup_exact(&record.prompt_content) {
        return Some((flag, LabelSource::DatasetExact));
    }
    if let Some(flag) = dataset.lookup_structural(&record.prompt_content) {
        return Some((flag, LabelSource::DatasetStructural));
    }
    dataset
        .lookup_position(record.prompt_id)
        .map(|flag| (flag, LabelSource::DatasetPositional))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::dataset::{canonical_dialogue_key, DatasetEntry};
    use serde_json::json;

    fn record(prompt_id: usize, prompt: &str, reply: &str) -> ResponseRecord {
        ResponseRecord {
            prompt_id,
            prompt_content: prompt.to_string(),
            response_text: reply.to_string(),
            response_is_structured: true,
            artifact_path: format!("outputs/response_{}_test.json", prompt_id),
        }
    }

    fn dataset(entries: Vec<(serde_json::Value, bool)>) -> ReferenceDataset {
        ReferenceDataset::from_entries(
            entries
                .into_iter()
                .map(|(dialogue, flag)| DatasetEntry {
                    dialogue: Some(dialogue),
                    has_command: Some(flag),
                })
                .collect(),
        )
    }

    #[test]
    fn test_plain_prompt_without_dataset_defaults_false() {
        let r = resolve(&record(1, "打开客厅的灯。", r#"{"has_command": true}"#), None);
        assert!(r.prediction);
        assert!(!r.ground_truth);
        assert_eq!(r.source, LabelSource::Default);
        assert_eq!(r.category, Category::FP);
    }

    #[test]
    fn test_exact_dataset_match() {
        let dialogue = json!([{"speaker": "用户", "content": "打开客厅的灯。"}]);
        let ds = dataset(vec![(dialogue.clone(), true)]);
        let prompt = canonical_dialogue_key(&dialogue);

        let r = resolve(&record(5, &prompt, r#"{"has_command": true}"#), Some(&ds));
        assert_eq!(r.source, LabelSource::DatasetExact);
        assert_eq!(r.category, Category::TP);
    }

    #[test]
    fn test_exact_match_for_dataset_loaded_from_file() {
        let entries: Vec<DatasetEntry> = serde_json::from_str(
            r#"[{"dialog": [{"speaker": "用户", "content": "打开客厅的灯。"}], "has_command": true}]"#,
        )
        .unwrap();
        let ds = ReferenceDataset::from_entries(entries);

        for prompt in [
            r#"{"dialogue":[{"speaker":"用户","content":"打开客厅的灯。"}]}"#,
            r#"{"dialog": [{"speaker": "用户", "content": "打开客厅的灯。"}]}"#,
        ] {
            let r = resolve(&record(1, prompt, r#"{"has_command": true}"#), Some(&ds));
            assert_eq!(r.source, LabelSource::DatasetExact, "prompt {prompt}");
            assert_eq!(r.category, Category::TP);
        }
    }

    #[test]
    fn test_embedded_flag_beats_conflicting_dataset() {
        let dialogue = json!([{"speaker": "用户", "content": "今天好热"}]);
        let ds = dataset(vec![(dialogue.clone(), true)]);
        let prompt = json!({"dialogue": dialogue, "has_command": false}).to_string();

        let r = resolve(&record(1, &prompt, r#"{"has_command": false}"#), Some(&ds));
        assert_eq!(r.source, LabelSource::Embedded);
        assert!(!r.ground_truth);
        assert_eq!(r.category, Category::TN);
    }

    #[test]
    fn test_structural_match_after_exact_miss() {
        let dialogue = json!([{"speaker": "用户", "content": "把音量调低"}]);
        let ds = dataset(vec![(dialogue, true)]);
        let prompt = "{\n  \"dialogue\": [\n    {\"content\": \"把音量调低\", \"speaker\": \"用户\"}\n  ]\n}";

        let r = resolve(&record(9, prompt, r#"{"has_command": false}"#), Some(&ds));
        assert_eq!(r.source, LabelSource::DatasetStructural);
        assert_eq!(r.category, Category::FN);
    }

    #[test]
    fn test_positional_fallback() {
        let ds = dataset(vec![
            (json!([{"speaker": "A", "content": "x"}]), false),
            (json!([{"speaker": "A", "content": "y"}]), true),
        ]);
        let r = resolve(&record(2, "unrelated prompt", r#"{"has_command": true}"#), Some(&ds));
        assert_eq!(r.source, LabelSource::DatasetPositional);
        assert_eq!(r.category, Category::TP);

        let r = resolve(&record(3, "unrelated prompt", r#"{"has_command": true}"#), Some(&ds));
        assert_eq!(r.source, LabelSource::Default);
    }

    #[test]
    fn test_unparseable_reply_predicts_false() {
        let r = resolve(&record(1, "打开客厅的灯。", "好的，我来帮你开灯"), None);
        assert!(!r.prediction);
        assert_eq!(r.category, Category::TN);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let rec = record(1, "打开客厅的灯。", r#"{"has_command": true}"#);
        assert_eq!(resolve(&rec, None), resolve(&rec, None));
    }

    #[test]
    fn test_category_serializes_as_tag() {
        assert_eq!(serde_json::to_value(Category::FP).unwrap(), json!("FP"));
        assert_eq!(
            serde_json::to_value(LabelSource::DatasetExact).unwrap(),
            json!("DATASET_EXACT")
        );
    }
}
