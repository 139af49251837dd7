use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5-coder:3b";
const DEFAULT_TEMPERATURE: f64 = 0.01;
const DEFAULT_TOP_P: f64 = 0.9;
const DEFAULT_PRECISION_BIAS: f64 = 0.0;
const DEFAULT_KEEP_ALIVE: &str = "5m";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const DEFAULT_DELAY_MS: u64 = 100;
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_PROBE_CACHE_CAPACITY: usize = 16;

/// Sampling parameters forwarded with every chat request. `precision_bias`
/// never leaves the process; it is applied to the reply afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub precision_bias: f64,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            precision_bias: DEFAULT_PRECISION_BIAS,
        }
    }
}

/// Exponential backoff: attempt `n` (0-based) that fails waits
/// `base * 2^n` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Never below 1.
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_base,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_COUNT,
            Duration::from_millis(DEFAULT_RETRY_BASE_MS),
        )
    }
}

/// Everything the client needs. Cloned out of [`Config`] so the client can be
/// built without the rest of the run settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub keep_alive: String,
    pub probe_cache_capacity: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            probe_cache_capacity: DEFAULT_PROBE_CACHE_CAPACITY,
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    pub fn tags_endpoint(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub model: String,
    pub decoding: DecodingParams,
    pub output_dir: PathBuf,
    pub delay: Duration,
    pub resume: bool,
    pub save_raw: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let client = ClientConfig {
            base_url: std::env::var("OLLAMA_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.into())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            retry: RetryPolicy::new(
                env_parse("RETRY_COUNT", DEFAULT_RETRY_COUNT),
                Duration::from_millis(env_parse("RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
            ),
            keep_alive: std::env::var("KEEP_ALIVE").unwrap_or_else(|_| DEFAULT_KEEP_ALIVE.into()),
            probe_cache_capacity: env_parse("PROBE_CACHE_CAPACITY", DEFAULT_PROBE_CACHE_CAPACITY),
        };

        Self {
            client,
            model: std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            decoding: DecodingParams {
                temperature: env_parse("TEMPERATURE", DEFAULT_TEMPERATURE),
                top_p: env_parse("TOP_P", DEFAULT_TOP_P),
                precision_bias: env_parse("PRECISION_BIAS", DEFAULT_PRECISION_BIAS),
            },
            output_dir: PathBuf::from(
                std::env::var("OUTPUT_DIR").unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.into()),
            ),
            delay: Duration::from_millis(env_parse("REQUEST_DELAY_MS", DEFAULT_DELAY_MS)),
            resume: true,
            save_raw: false,
        }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }

    pub fn print_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║           command-intent v{}                  ║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  API URL:           {:<28}║", self.client.base_url);
        tracing::info!("║  Model:             {:<28}║", self.model);
        tracing::info!("║  Temperature:       {:<28}║", self.decoding.temperature);
        tracing::info!("║  Top-p:             {:<28}║", self.decoding.top_p);
        tracing::info!("║  Precision bias:    {:<28}║", self.decoding.precision_bias);
        tracing::info!("║  Attempts:          {:<28}║", self.client.retry.attempts);
        tracing::info!("║  Backoff base:      {:<24}ms ║", self.client.retry.backoff_base.as_millis());
        tracing::info!("║  Request delay:     {:<24}ms ║", self.delay.as_millis());
        tracing::info!("║  Output dir:        {:<28}║", self.output_dir.display());
        tracing::info!("║  Resume:            {:<28}║", if self.resume { "enabled" } else { "disabled" });
        tracing::info!("║  Raw capture:       {:<28}║", if self.save_raw { "enabled" } else { "disabled" });
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
