use std::path::PathBuf;

/// Failure talking to the chat endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),

    /// Connection failure or non-2xx status, after every attempt was spent.
    #[error("request to {endpoint} failed after {attempts} attempt(s): {message}")]
    Transport {
        endpoint: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    /// The response body broke off while a stream was being consumed.
    #[error("stream from {endpoint} interrupted: {message}")]
    Stream { endpoint: String, message: String },

    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

/// The reference dataset could not be loaded. Callers recover by scoring
/// without ground-truth coverage.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset {} is not a JSON array of entries", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable storage failure. Propagates out of the batch run and ends it.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is not a valid run summary", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = ClientError::Transport {
            endpoint: "http://localhost:11434/api/chat".to_string(),
            attempts: 3,
            status: Some(503),
            message: "HTTP 503".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempt(s)"));
        assert!(msg.contains("/api/chat"));
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_artifact_error_keeps_source() {
        let err = ArtifactError::Write {
            path: PathBuf::from("/tmp/x/summary.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("summary.json"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
