//! Mutation correlation tokens and request/response shapes.
//!
//! # Invariants
//! - Every issued network mutation carries a fresh `MutationToken`.
//! - A token is never reused after its mutation resolves.

use crate::model::board::{BoardId, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Locally generated correlation token for one in-flight mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationToken(Uuid);

impl MutationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MutationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network mutation the driver must send for a staged intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    CreateTask { board_id: BoardId, title: String },
    MoveTask { task_id: TaskId, status: TaskStatus },
    DeleteTask { task_id: TaskId },
    CreateBoard { title: String },
    DeleteBoard { board_id: BoardId },
}

impl MutationRequest {
    /// Short operation name used in log events.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateTask { .. } => "create_task",
            Self::MoveTask { .. } => "move_task",
            Self::DeleteTask { .. } => "delete_task",
            Self::CreateBoard { .. } => "create_board",
            Self::DeleteBoard { .. } => "delete_board",
        }
    }
}

/// Successful network result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResponse {
    /// `createTask` echo carrying the server-assigned id.
    Created { id: TaskId, title: String },
    /// `createBoard` echo carrying the server-assigned id.
    BoardCreated { id: BoardId, title: String },
    /// Boolean acknowledgment of `moveTask`, `deleteTask` and `deleteBoard`.
    Acknowledged(bool),
}

/// Entity a committed mutation resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId {
    Task(TaskId),
    Board(BoardId),
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::Board(id) => write!(f, "board:{id}"),
        }
    }
}

/// A staged mutation ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedMutation {
    pub token: MutationToken,
    pub request: MutationRequest,
    /// Placeholder id shown in the store until a create is confirmed.
    pub placeholder: Option<TaskId>,
    /// Earlier token of the same task's move that this one re-targets.
    pub supersedes: Option<MutationToken>,
}
