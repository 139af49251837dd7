use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::payload::{excerpt, interpret_reply, probe_payload, ChatRequest};
use super::probe::ProbeCache;
use super::stream::{decode_ndjson, TextStream};
use super::types::{ChatReply, ModelInfo, ProbeVerdict, TagsResponse};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::metrics::RunMetrics;

const PROBE_DIAGNOSTIC_CHARS: usize = 100;
const ERROR_BODY_CHARS: usize = 500;

/// Async client for the Ollama chat endpoint.
///
/// `send`/`send_full` retry transport failures with exponential backoff;
/// `stream` makes a single attempt and yields text increments lazily.
pub struct OllamaClient {
    http: reqwest::Client,
    config: ClientConfig,
    probes: ProbeCache,
    metrics: Arc<RunMetrics>,
}

impl OllamaClient {
    pub fn new(config: ClientConfig, metrics: Arc<RunMetrics>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            probes: ProbeCache::new(config.probe_cache_capacity),
            config,
            metrics,
        })
    }

    /// Forget the cached availability verdict for `model`, so the next
    /// check goes back to the endpoint.
    pub fn invalidate_probe(&self, model: &str) -> bool {
        self.probes.invalidate(model)
    }

    /// Send one request and return the reply text, precision bias applied.
    pub async fn send(&self, request: &ChatRequest) -> Result<String, ClientError> {
        Ok(self.send_full(request).await?.content)
    }

    /// Like [`send`](Self::send) but also hands back the untouched body.
    pub async fn send_full(&self, request: &ChatRequest) -> Result<ChatReply, ClientError> {
        let endpoint = self.config.chat_endpoint();
        let payload = request.payload(false, &self.config.keep_alive);
        let policy = self.config.retry;

        debug!(
            model = %request.model,
            temperature = request.decoding.temperature,
            top_p = request.decoding.top_p,
            precision_bias = request.decoding.precision_bias,
            "Calling chat endpoint"
        );

        let mut attempt = 0u32;
        loop {
            self.metrics.record_remote_attempt();
            match self.post_once(&endpoint, &payload).await {
                Ok(raw) => {
                    let reply = interpret_reply(&request.model, raw, request.decoding.precision_bias);
                    if !reply.well_formed {
                        self.metrics.record_malformed_reply();
                    }
                    return Ok(reply);
                }
                Err((status, message)) => {
                    warn!(
                        attempt = attempt + 1,
                        attempts = policy.attempts,
                        error = %message,
                        "Chat request failed"
                    );
                    if attempt + 1 >= policy.attempts {
                        error!(
                            attempts = policy.attempts,
                            "Chat request failed after all retries: {}", message
                        );
                        if self.invalidate_probe(&request.model) {
                            debug!(model = %request.model, "Dropped cached probe verdict");
                        }
                        return Err(ClientError::Transport {
                            endpoint,
                            attempts: policy.attempts,
                            status,
                            message,
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    info!("Retrying in {:.2}s", delay.as_secs_f64());
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_once(
        &self,
        endpoint: &str,
        payload: &super::types::ChatPayload,
    ) -> Result<serde_json::Value, (Option<u16>, String)> {
        let resp = self
            .http
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| (None, format!("connection error: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err((
                Some(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), excerpt(&body, ERROR_BODY_CHARS)),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| (Some(status.as_u16()), format!("failed to read body: {}", e)))?;

        // A 2xx body that is not JSON is a shape problem, not a transport one.
        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }))
    }

    /// Open a streaming request. Increments arrive as the model produces them;
    /// dropping the returned stream closes the connection.
    pub async fn stream(
        &self,
        request: &ChatRequest,
    ) -> Result<TextStream, ClientError> {
        let endpoint = self.config.chat_endpoint();
        let payload = request.payload(true, &self.config.keep_alive);

        debug!(model = %request.model, "Opening chat stream");
        self.metrics.record_remote_attempt();

        let resp = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                endpoint: endpoint.clone(),
                attempts: 1,
                status: None,
                message: format!("connection error: {}", e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Transport {
                endpoint,
                attempts: 1,
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), excerpt(&body, ERROR_BODY_CHARS)),
            });
        }

        Ok(Box::pin(decode_ndjson(Box::pin(resp.bytes_stream()), endpoint)))
    }

    /// Check that `model` answers a one-token request. Verdicts are cached per
    /// model until [`invalidate_probe`](Self::invalidate_probe), which a
    /// request that exhausts its retries also triggers.
    pub async fn check_model_available(&self, model: &str) -> ProbeVerdict {
        if let Some(verdict) = self.probes.get(model) {
            debug!(model = %model, available = verdict.available, "Probe cache hit");
            return verdict;
        }

        let verdict = self.probe_once(model).await;
        self.probes.insert(model, verdict.clone());
        verdict
    }

    async fn probe_once(&self, model: &str) -> ProbeVerdict {
        let endpoint = self.config.chat_endpoint();
        self.metrics.record_remote_attempt();

        let resp = match self.http.post(&endpoint).json(&probe_payload(model)).send().await {
            Ok(r) => r,
            Err(e) => {
                return ProbeVerdict {
                    available: false,
                    diagnostic: format!("connection error: {}", e),
                }
            }
        };

        let status = resp.status();
        if status.as_u16() == 200 {
            return ProbeVerdict {
                available: true,
                diagnostic: String::new(),
            };
        }

        let body = resp.text().await.unwrap_or_default();
        ProbeVerdict {
            available: false,
            diagnostic: probe_diagnostic(status.as_u16(), &body),
        }
    }

    /// Models installed on the endpoint (`/api/tags`).
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let endpoint = self.config.tags_endpoint();
        let transport = |status: Option<u16>, message: String| ClientError::Transport {
            endpoint: endpoint.clone(),
            attempts: 1,
            status,
            message,
        };

        let resp = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| transport(None, format!("connection error: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(transport(
                Some(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), excerpt(&body, ERROR_BODY_CHARS)),
            ));
        }

        let tags: TagsResponse = resp.json().await.map_err(|e| ClientError::Decode {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        Ok(tags.models)
    }
}

/// Explain a non-200 probe reply: the body's `error` field when it has one,
/// otherwise the status and the start of the body.
pub(crate) fn probe_diagnostic(status: u16, body: &str) -> String {
    if body.is_empty() {
        return format!("model unavailable: HTTP {}", status);
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.get("error") {
            Some(serde_json::Value::String(msg)) => format!("model error: {}", msg),
            Some(other) => format!("model error: {}", other),
            None => format!("model unavailable: HTTP {}", status),
        },
        Err(_) => format!(
            "model unavailable: {}",
            excerpt(body, PROBE_DIAGNOSTIC_CHARS)
        ),
    }
}
