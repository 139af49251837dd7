use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::artifacts::{ArtifactStore, ResponseRecord};
use super::fingerprint::fingerprint;
use super::progress::{BatchProgress, ItemState};
use crate::config::{Config, DecodingParams};
use crate::error::ArtifactError;
use crate::evaluation::labels::extract_json;
use crate::metrics::{MetricsSnapshot, RunMetrics};
use crate::ollama::{ChatRequest, OllamaClient};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOptions {
    pub resume: bool,
    pub save_raw: bool,
    /// Pause after each remote call, except after the last item.
    pub delay: Duration,
    pub decoding: DecodingParams,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resume: config.resume,
            save_raw: config.save_raw,
            delay: config.delay,
            decoding: config.decoding,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    /// Distinct prompt ids of this input list present in the summary.
    pub processed_count: usize,
    pub total_count: usize,
    pub summary_location: PathBuf,
    pub records: Vec<ResponseRecord>,
    /// Counter movement during this run only.
    pub metrics: MetricsSnapshot,
}

/// Sequential, checkpointed run over a prompt list. Each item's result is on
/// disk, and the summary rewritten, before the next item starts.
///
/// One processor per output directory: concurrent runs against the same
/// directory may interleave writes.
pub struct BatchProcessor {
    client: Arc<OllamaClient>,
    store: ArtifactStore,
    options: BatchOptions,
    metrics: Arc<RunMetrics>,
}

impl BatchProcessor {
    pub fn new(
        client: Arc<OllamaClient>,
        store: ArtifactStore,
        options: BatchOptions,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            client,
            store,
            options,
            metrics,
        }
    }

    pub async fn run(
        &self,
        model: &str,
        system_prompt: Option<&str>,
        prompts: &[String],
    ) -> Result<BatchOutcome, ArtifactError> {
        let run_id = Uuid::new_v4();
        let total = prompts.len();
        let before = self.metrics.snapshot();

        self.store.prepare(self.options.save_raw).await?;

        let mut summary = if self.options.resume {
            self.store.load_summary().await
        } else {
            Vec::new()
        };
        let mut processed_ids: HashSet<usize> = summary.iter().map(|r| r.prompt_id).collect();
        let existing: HashMap<String, PathBuf> = if self.options.resume {
            self.store.scan().await
        } else {
            HashMap::new()
        };

        info!(
            run_id = %run_id,
            model = %model,
            total,
            already_processed = processed_ids.len(),
            "Starting batch run"
        );

        let mut progress = BatchProgress::new(run_id, total);

        for (index, prompt) in prompts.iter().enumerate() {
            let prompt_id = index + 1;
            let is_last = index + 1 == total;

            if self.options.resume && processed_ids.contains(&prompt_id) {
                info!(run_id = %run_id, prompt_id, "Skipping prompt {}/{}: already in summary", prompt_id, total);
                progress.transition(prompt_id, ItemState::SkippedResumed);
                self.metrics.record_resumed();
                continue;
            }

            let fp = fingerprint(prompt);

            if let Some(path) = existing.get(&fp) {
                match self.store.read_artifact(path).await {
                    Ok(text) => {
                        info!(
                            run_id = %run_id,
                            prompt_id,
                            fingerprint = %fp,
                            "Reusing existing artifact {}",
                            path.display()
                        );
                        summary.push(ResponseRecord {
                            prompt_id,
                            prompt_content: prompt.clone(),
                            response_is_structured: extract_json(&text).is_some(),
                            response_text: text,
                            artifact_path: path.display().to_string(),
                        });
                        processed_ids.insert(prompt_id);
                        self.store.save_summary(&summary).await?;
                        progress.transition(prompt_id, ItemState::SkippedCached);
                        self.metrics.record_cached();
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            prompt_id,
                            fingerprint = %fp,
                            "Existing artifact unreadable, calling the model instead: {}",
                            e
                        );
                    }
                }
            }

            info!(
                run_id = %run_id,
                prompt_id,
                fingerprint = %fp,
                "Processing prompt {}/{}: {}",
                prompt_id,
                total,
                preview(prompt)
            );
            progress.transition(prompt_id, ItemState::Calling);

            let mut request =
                ChatRequest::new(model, prompt.as_str()).with_decoding(self.options.decoding);
            if let Some(system) = system_prompt {
                request = request.with_system(system);
            }

            match self.client.send_full(&request).await {
                Ok(reply) => {
                    if self.options.save_raw {
                        self.store.write_raw(prompt_id, &fp, &reply.raw).await?;
                    }

                    let (body, structured) = match extract_json(&reply.content) {
                        Some(value) => {
                            let pretty = serde_json::to_string_pretty(&value).map_err(|source| {
                                ArtifactError::Serialize {
                                    what: "structured reply",
                                    source,
                                }
                            })?;
                            (pretty, true)
                        }
                        None => {
                            warn!(
                                run_id = %run_id,
                                prompt_id,
                                fingerprint = %fp,
                                "Reply is not structured, saving it verbatim"
                            );
                            (reply.content.clone(), false)
                        }
                    };

                    let path = self.store.artifact_path(prompt_id, &fp);
                    self.store.write_artifact(&path, &body).await?;

                    summary.push(ResponseRecord {
                        prompt_id,
                        prompt_content: prompt.clone(),
                        response_text: body,
                        response_is_structured: structured,
                        artifact_path: path.display().to_string(),
                    });
                    processed_ids.insert(prompt_id);
                    self.store.save_summary(&summary).await?;

                    progress.transition(prompt_id, ItemState::Persisted);
                    self.metrics.record_persisted();
                }
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        prompt_id,
                        fingerprint = %fp,
                        status = ?e.status(),
                        "Failed to process prompt: {}",
                        e
                    );
                    progress.transition(prompt_id, ItemState::Failed);
                    self.metrics.record_failed();
                }
            }

            if !is_last && !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }
        }

        if !summary.is_empty() {
            self.store.save_summary(&summary).await?;
        }
        progress.finish();

        let processed_count = processed_ids
            .iter()
            .filter(|id| (1..=total).contains(*id))
            .count();

        Ok(BatchOutcome {
            run_id,
            processed_count,
            total_count: total,
            summary_location: self.store.summary_path(),
            records: summary,
            metrics: self.metrics.snapshot().since(&before),
        })
    }
}

fn preview(prompt: &str) -> String {
    let mut out: String = prompt.chars().take(50).collect();
    if prompt.chars().count() > 50 {
        out.push_str("...");
    }
    out
}
