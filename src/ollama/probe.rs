use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::types::ProbeVerdict;

/// Availability verdicts keyed by model name. Bounded, least recently used
/// entry evicted first. Entries never expire on their own; call
/// [`ProbeCache::invalidate`] to force a model to be probed again.
pub struct ProbeCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    verdicts: HashMap<String, ProbeVerdict>,
    recency: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, model: &str) {
        if let Some(pos) = self.recency.iter().position(|m| m == model) {
            if let Some(name) = self.recency.remove(pos) {
                self.recency.push_back(name);
            }
        }
    }
}

impl ProbeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, model: &str) -> Option<ProbeVerdict> {
        let mut inner = self.inner.lock();
        let verdict = inner.verdicts.get(model).cloned()?;
        inner.touch(model);
        Some(verdict)
    }

    pub fn insert(&self, model: &str, verdict: ProbeVerdict) {
        let mut inner = self.inner.lock();
        if inner.verdicts.insert(model.to_string(), verdict).is_some() {
            inner.touch(model);
            return;
        }
        inner.recency.push_back(model.to_string());
        while inner.recency.len() > self.capacity {
            if let Some(evicted) = inner.recency.pop_front() {
                inner.verdicts.remove(&evicted);
            }
        }
    }

    /// Drop the cached verdict for one model. Returns whether one existed.
    pub fn invalidate(&self, model: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.recency.retain(|m| m != model);
        inner.verdicts.remove(model).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().verdicts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
