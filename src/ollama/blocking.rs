//! Synchronous twin of [`OllamaClient`](super::OllamaClient) for callers that
//! run outside an async runtime. Same payloads, retry policy and reply
//! handling; the thread sleeps between attempts.
//!
//! `reqwest::blocking` spins up its own runtime, so construct and use this
//! client off the async executor (plain threads or `spawn_blocking`).

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::payload::{excerpt, interpret_reply, ChatRequest};
use super::types::{ChatPayload, ChatReply};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::metrics::RunMetrics;

const ERROR_BODY_CHARS: usize = 500;

pub struct BlockingOllamaClient {
    http: reqwest::blocking::Client,
    config: ClientConfig,
    metrics: Arc<RunMetrics>,
}

impl BlockingOllamaClient {
    pub fn new(config: ClientConfig, metrics: Arc<RunMetrics>) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            config,
            metrics,
        })
    }

    pub fn send(&self, request: &ChatRequest) -> Result<String, ClientError> {
        Ok(self.send_full(request)?.content)
    }

    pub fn send_full(&self, request: &ChatRequest) -> Result<ChatReply, ClientError> {
        let endpoint = self.config.chat_endpoint();
        let payload = request.payload(false, &self.config.keep_alive);
        let policy = self.config.retry;

        debug!(model = %request.model, "Calling chat endpoint (blocking)");

        let mut attempt = 0u32;
        loop {
            self.metrics.record_remote_attempt();
            match self.post_once(&endpoint, &payload) {
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
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn post_once(
        &self,
        endpoint: &str,
        payload: &ChatPayload,
    ) -> Result<serde_json::Value, (Option<u16>, String)> {
        let resp = self
            .http
            .post(endpoint)
            .json(payload)
            .send()
            .map_err(|e| (None, format!("connection error: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err((
                Some(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), excerpt(&body, ERROR_BODY_CHARS)),
            ));
        }

        let bytes = resp
            .bytes()
            .map_err(|e| (Some(status.as_u16()), format!("failed to read body: {}", e)))?;

        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }))
    }
}
