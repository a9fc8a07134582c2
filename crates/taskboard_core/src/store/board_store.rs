//! Owned store value and snapshot publication.

use crate::store::patch::{Patch, PatchEffect};
use crate::store::snapshot::BoardSnapshot;
use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of `BoardStore::apply`.
#[derive(Debug, Clone)]
pub struct Applied {
    /// Current snapshot after the patch (unchanged one on no-op).
    pub snapshot: Arc<BoardSnapshot>,
    pub effect: PatchEffect,
}

/// Single mutable surface holding the current snapshot.
///
/// Every change goes through `apply`; observers receive each committed
/// snapshot through `subscribe`.
pub struct BoardStore {
    current: Arc<BoardSnapshot>,
    publisher: watch::Sender<Arc<BoardSnapshot>>,
}

impl std::fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardStore")
            .field("revision", &self.revision())
            .field("tasks", &self.current.task_count())
            .finish()
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardStore {
    pub fn new() -> Self {
        let current = Arc::new(BoardSnapshot::default());
        let (publisher, _) = watch::channel(Arc::clone(&current));
        Self { current, publisher }
    }

    /// Returns the current snapshot.
    pub fn read(&self) -> Arc<BoardSnapshot> {
        Arc::clone(&self.current)
    }

    pub fn revision(&self) -> u64 {
        self.current.revision()
    }

    /// Applies one patch and publishes the result when content changed.
    pub fn apply(&mut self, patch: &Patch) -> Applied {
        let (next, effect) = patch.apply(&self.current);
        match effect {
            PatchEffect::Changed => {
                self.current = Arc::new(next);
                self.publisher.send_replace(Arc::clone(&self.current));
                trace!(
                    "event=store_apply module=store status=ok patch={} revision={}",
                    patch.name(),
                    self.current.revision()
                );
            }
            PatchEffect::Noop(reason) => {
                debug!(
                    "event=store_apply module=store status=noop patch={} reason={}",
                    patch.name(),
                    reason.as_str()
                );
            }
        }
        Applied {
            snapshot: self.read(),
            effect,
        }
    }

    /// Returns a receiver that observes every committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.publisher.subscribe()
    }
}
