use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    SkippedCached,
    SkippedResumed,
    Calling,
    Persisted,
    Failed,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::SkippedCached
                | ItemState::SkippedResumed
                | ItemState::Persisted
                | ItemState::Failed
        )
    }

    fn can_move_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, SkippedCached)
                | (Pending, SkippedResumed)
                | (Pending, Calling)
                | (Calling, Persisted)
                | (Calling, Failed)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemTransition {
    pub prompt_id: usize,
    pub from: ItemState,
    pub to: ItemState,
    pub elapsed_ms: u64,
}

/// Per-item state machine for one batch run.
pub struct BatchProgress {
    run_id: Uuid,
    started_at: Instant,
    states: Vec<ItemState>,
    entered_at: Vec<Instant>,
    transitions: Vec<ItemTransition>,
}

impl BatchProgress {
    pub fn new(run_id: Uuid, total: usize) -> Self {
        let now = Instant::now();
        info!(run_id = %run_id, total, "Starting batch progress tracking");
        Self {
            run_id,
            started_at: now,
            states: vec![ItemState::Pending; total],
            entered_at: vec![now; total],
            transitions: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.states.len()
    }

    /// State of the item with 1-based `prompt_id`.
    #[cfg(test)]
    pub fn state(&self, prompt_id: usize) -> Option<ItemState> {
        prompt_id
            .checked_sub(1)
            .and_then(|i| self.states.get(i))
            .copied()
    }

    pub fn transitions(&self) -> &[ItemTransition] {
        &self.transitions
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Move an item to `next`. Moves the state machine does not allow are
    /// logged and ignored.
    pub fn transition(&mut self, prompt_id: usize, next: ItemState) -> bool {
        let Some(index) = prompt_id.checked_sub(1).filter(|i| *i < self.states.len()) else {
            warn!(run_id = %self.run_id, prompt_id, "Transition for unknown item");
            return false;
        };

        let current = self.states[index];
        if !current.can_move_to(next) {
            warn!(
                run_id = %self.run_id,
                prompt_id,
                from = ?current,
                to = ?next,
                "Rejected item transition"
            );
            return false;
        }

        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.entered_at[index]).as_millis() as u64;
        debug!(
            run_id = %self.run_id,
            prompt_id,
            from = ?current,
            to = ?next,
            elapsed_ms,
            "Item transition"
        );

        self.transitions.push(ItemTransition {
            prompt_id,
            from: current,
            to: next,
            elapsed_ms,
        });
        self.states[index] = next;
        self.entered_at[index] = now;
        true
    }

    pub fn count(&self, state: ItemState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.states.is_empty() {
            return 100.0;
        }
        let done = self.states.iter().filter(|s| s.is_terminal()).count();
        (done as f64 / self.states.len() as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| s.is_terminal())
    }

    pub fn finish(&self) {
        info!(
            run_id = %self.run_id,
            elapsed_ms = self.elapsed_ms(),
            total = self.total(),
            progress = format!("{:.1}%", self.progress_percent()),
            complete = self.is_complete(),
            transitions = self.transitions().len(),
            persisted = self.count(ItemState::Persisted),
            cached = self.count(ItemState::SkippedCached),
            resumed = self.count(ItemState::SkippedResumed),
            failed = self.count(ItemState::Failed),
            "Batch finished"
        );
    }
}
