use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters shared by the client and the batch processor.
#[derive(Debug)]
pub struct RunMetrics {
    pub remote_attempts: AtomicU64,
    pub retries: AtomicU64,
    pub malformed_replies: AtomicU64,
    pub items_persisted: AtomicU64,
    pub items_cached: AtomicU64,
    pub items_resumed: AtomicU64,
    pub items_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub remote_attempts: u64,
    pub retries: u64,
    pub malformed_replies: u64,
    pub items_persisted: u64,
    pub items_cached: u64,
    pub items_resumed: u64,
    pub items_failed: u64,
}

impl RunMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            remote_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            malformed_replies: AtomicU64::new(0),
            items_persisted: AtomicU64::new(0),
            items_cached: AtomicU64::new(0),
            items_resumed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
        })
    }

    pub fn record_remote_attempt(&self) {
        self.remote_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_reply(&self) {
        self.malformed_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.items_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cached(&self) {
        self.items_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resumed(&self) {
        self.items_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            remote_attempts: self.remote_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            malformed_replies: self.malformed_replies.load(Ordering::Relaxed),
            items_persisted: self.items_persisted.load(Ordering::Relaxed),
            items_cached: self.items_cached.load(Ordering::Relaxed),
            items_resumed: self.items_resumed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Counter movement between two snapshots of the same process.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            remote_attempts: self.remote_attempts.saturating_sub(earlier.remote_attempts),
            retries: self.retries.saturating_sub(earlier.retries),
            malformed_replies: self.malformed_replies.saturating_sub(earlier.malformed_replies),
            items_persisted: self.items_persisted.saturating_sub(earlier.items_persisted),
            items_cached: self.items_cached.saturating_sub(earlier.items_cached),
            items_resumed: self.items_resumed.saturating_sub(earlier.items_resumed),
            items_failed: self.items_failed.saturating_sub(earlier.items_failed),
        }
    }
}
