//! Consistency policy shared by the mutation applier and event merge handler.
//!
//! # Responsibility
//! - Track which keys have unresolved optimistic mutations.
//! - Decide whether a pushed event applies now or waits.
//! - Hand back waiting events, in arrival order, once their key resolves.
//!
//! # Invariants
//! - Events for a held key are queued, never dropped.
//! - A queue drains only when its key's hold count reaches zero.
//! - Without a hold, the latest delivered event wins unconditionally.

use crate::model::board::{BoardId, TaskId};
use crate::model::event::ScopedEvent;
use crate::store::snapshot::BoardSnapshot;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};

/// What an unresolved local mutation holds back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingKey {
    /// Events for this task id.
    Task(TaskId),
    /// Events introducing unknown task ids into this board, which may be the
    /// server echo of our own unconfirmed create.
    BoardCreate(BoardId),
    /// Every event scoped to a board whose deletion is unresolved.
    Board(BoardId),
}

impl Display for PendingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::BoardCreate(id) => write!(f, "board_create:{id}"),
            Self::Board(id) => write!(f, "board:{id}"),
        }
    }
}

/// Decision for one incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Apply(ScopedEvent),
    Deferred { key: PendingKey, queued: usize },
}

/// Hold counters and per-key event queues.
#[derive(Debug, Default)]
pub struct ConsistencyPolicy {
    holds: BTreeMap<PendingKey, usize>,
    queues: BTreeMap<PendingKey, VecDeque<ScopedEvent>>,
}

impl ConsistencyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more unresolved mutation on `key`.
    pub fn hold(&mut self, key: PendingKey) {
        *self.holds.entry(key).or_default() += 1;
    }

    /// Resolves one mutation on `key`.
    ///
    /// Returns the queued events when this was the last hold.
    pub fn release(&mut self, key: PendingKey) -> Vec<ScopedEvent> {
        match self.holds.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Vec::new()
            }
            Some(_) => {
                self.holds.remove(&key);
                self.queues
                    .remove(&key)
                    .map(Vec::from)
                    .unwrap_or_default()
            }
            None => Vec::new(),
        }
    }

    pub fn is_held(&self, key: PendingKey) -> bool {
        self.holds.contains_key(&key)
    }

    /// Decides whether `scoped` may be merged against `snapshot` now.
    pub fn admit(&mut self, scoped: ScopedEvent, snapshot: &BoardSnapshot) -> Admission {
        let board_key = PendingKey::Board(scoped.board_id);
        if self.is_held(board_key) {
            return self.defer(board_key, scoped);
        }

        let task_key = PendingKey::Task(scoped.event.id);
        if self.is_held(task_key) {
            return self.defer(task_key, scoped);
        }

        let create_key = PendingKey::BoardCreate(scoped.board_id);
        if !snapshot.contains_task(scoped.event.id) && self.is_held(create_key) {
            return self.defer(create_key, scoped);
        }

        Admission::Apply(scoped)
    }

    /// Number of events waiting across all keys.
    pub fn queued_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Number of keys with at least one unresolved mutation.
    pub fn held_keys(&self) -> usize {
        self.holds.len()
    }

    fn defer(&mut self, key: PendingKey, scoped: ScopedEvent) -> Admission {
        let queue = self.queues.entry(key).or_default();
        // At-least-once delivery repeats events back to back after reconnect.
        if queue.back() != Some(&scoped) {
            queue.push_back(scoped);
        }
        Admission::Deferred {
            key,
            queued: queue.len(),
        }
    }
}
