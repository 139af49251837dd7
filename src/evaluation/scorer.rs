use serde::{Deserialize, Serialize};
use tracing::info;

use super::dataset::ReferenceDataset;
use super::resolver::{resolve, Category, LabelSource, Resolution};
use crate::batch::ResponseRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    #[serde(rename = "TP")]
    pub true_positives: usize,
    #[serde(rename = "FP")]
    pub false_positives: usize,
    #[serde(rename = "TN")]
    pub true_negatives: usize,
    #[serde(rename = "FN")]
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn from_categories(categories: impl IntoIterator<Item = Category>) -> Self {
        let mut matrix = Self::default();
        for category in categories {
            match category {
                Category::TP => matrix.true_positives += 1,
                Category::FP => matrix.false_positives += 1,
                Category::TN => matrix.true_negatives += 1,
                Category::FN => matrix.false_negatives += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            return 0.0;
        }
        2.0 * p * r / (p + r)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

/// Aggregate over a set of resolutions. Always recomputed from scratch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Records whose ground truth came from anywhere but the `false` default.
    pub valid_count: usize,
    pub total_count: usize,
}

pub fn score(resolutions: &[Resolution]) -> Scores {
    let confusion_matrix = ConfusionMatrix::from_categories(resolutions.iter().map(|r| r.category));
    Scores {
        accuracy: confusion_matrix.accuracy(),
        precision: confusion_matrix.precision(),
        recall: confusion_matrix.recall(),
        f1: confusion_matrix.f1(),
        valid_count: resolutions.iter().filter(|r| r.source.is_resolved()).count(),
        total_count: resolutions.len(),
        confusion_matrix,
    }
}

/// A summary record with its derived labels, as handed to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: ResponseRecord,
    #[serde(flatten)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(flatten)]
    pub scores: Scores,
    pub samples: Vec<ScoredRecord>,
}

impl Evaluation {
    pub fn default_labelled(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.resolution.source == LabelSource::Default)
            .count()
    }
}

/// Resolve and score every record of a summary.
pub fn evaluate(records: &[ResponseRecord], dataset: Option<&ReferenceDataset>) -> Evaluation {
    let samples: Vec<ScoredRecord> = records
        .iter()
        .map(|record| ScoredRecord {
            resolution: resolve(record, dataset),
            record: record.clone(),
        })
        .collect();

    let resolutions: Vec<Resolution> = samples.iter().map(|s| s.resolution).collect();
    let scores = score(&resolutions);

    let m = &scores.confusion_matrix;
    info!(
        total = scores.total_count,
        valid = scores.valid_count,
        tp = m.true_positives,
        fp = m.false_positives,
        tn = m.true_negatives,
        fn_ = m.false_negatives,
        "Scored {} records: accuracy {:.4}, precision {:.4}, recall {:.4}, f1 {:.4}",
        scores.total_count,
        scores.accuracy,
        scores.precision,
        scores.recall,
        scores.f1
    );

    Evaluation { scores, samples }
}
