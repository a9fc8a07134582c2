//! Pushed task change events.

use crate::model::board::{BoardId, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Upsert notification pushed by the server after another actor's confirmed
/// mutation. Deletions are never pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanged {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
}

/// A `TaskChanged` together with the board its subscription is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedEvent {
    pub board_id: BoardId,
    pub event: TaskChanged,
}

impl ScopedEvent {
    pub fn new(board_id: BoardId, event: TaskChanged) -> Self {
        Self { board_id, event }
    }
}
