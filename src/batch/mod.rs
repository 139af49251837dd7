pub mod artifacts;
pub mod fingerprint;
pub mod processor;
pub mod progress;

pub use artifacts::{read_summary, ArtifactStore, ResponseRecord};
pub use processor::{BatchOptions, BatchProcessor};
