//! Reversal log for one in-flight operation
//!
//! Every externally visible action an operation performs registers its
//! reversal here before the action runs. On success the tracker is dropped
//! untouched; on failure it is walked once, front to back. Entries added
//! with [`CompensationTracker::add`] go to the front (most recent undone
//! first); entries added with [`CompensationTracker::add_back`] go to the
//! back, for reversals that must happen only after every other reversal has
//! propagated.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use tracing::{info, warn};

type UndoFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

struct Compensation {
    seq: u64,
    description: String,
    undo: UndoFn,
}

/// Ordered list of compensating actions for one operation.
#[derive(Default)]
pub struct CompensationTracker {
    entries: VecDeque<Compensation>,
    next_seq: u64,
}

impl CompensationTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compensation at the front: it will run before everything
    /// registered earlier (stack discipline).
    pub fn add<F>(&mut self, description: &str, undo: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        let seq = self.bump();
        self.entries.push_front(Compensation {
            seq,
            description: description.to_string(),
            undo: Box::new(undo),
        });
    }

    /// Register a compensation at the back: it will run only after every
    /// other compensation, preserving causal ordering of reversal.
    pub fn add_back<F>(&mut self, description: &str, undo: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        let seq = self.bump();
        self.entries.push_back(Compensation {
            seq,
            description: description.to_string(),
            undo: Box::new(undo),
        });
    }

    /// Remove the most recently registered entry, returning its description.
    ///
    /// Used when a completed step makes its own compensation moot, e.g. a
    /// "remove partially cloned data" entry after the clone finished.
    pub fn cancel_last(&mut self) -> Option<String> {
        let (index, _) = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, entry)| entry.seq)?;
        self.entries
            .remove(index)
            .map(|entry| entry.description)
    }

    /// Number of registered compensations
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk the list once, front to back, invoking every compensation.
    ///
    /// A failing compensation is logged and retained for a later retry; the
    /// walk continues past it, since a half-undone state is preferable to
    /// stopping the reversal entirely. Returns the number of compensations
    /// that failed and remain registered.
    pub async fn execute(&mut self) -> usize {
        let total = self.entries.len();
        info!(total, "executing compensations");

        let mut remaining = VecDeque::new();
        while let Some(entry) = self.entries.pop_front() {
            info!(compensation = %entry.description, "reversing");
            match (entry.undo)().await {
                Ok(()) => {}
                Err(reason) => {
                    warn!(
                        compensation = %entry.description,
                        %reason,
                        "compensation failed; retained for retry"
                    );
                    remaining.push_back(entry);
                }
            }
        }
        self.entries = remaining;
        self.entries.len()
    }

    const fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

impl std::fmt::Debug for CompensationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationTracker")
            .field("entries", &self.entries.len())
            .finish()
    }
}
