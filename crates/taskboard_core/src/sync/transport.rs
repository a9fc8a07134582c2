//! Transport contract for the board protocol.
//!
//! # Responsibility
//! - Abstract the request/response mutations and the pushed event stream.
//! - Keep transport selection (HTTP, duplex channel, in-process) out of core.
//!
//! # Invariants
//! - Implementations never touch the store; results flow back through the
//!   client driver.
//! - `subscribe_task_changed` streams are at-least-once and may end at any
//!   time; an ended stream means "reconnect and resync".

use crate::model::board::{BoardId, TaskId, TaskStatus};
use crate::model::event::TaskChanged;
use crate::model::mutation::{MutationRequest, MutationResponse};
use crate::sync::wire::{BoardPayload, CreatedBoardPayload, CreatedTaskPayload};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TransportResult<T> = Result<T, TransportError>;

/// Live `TaskChanged` stream for one board.
pub type TaskChangedStream = BoxStream<'static, TransportResult<TaskChanged>>;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed or was dropped.
    Network(String),
    /// Server returned an error for the operation.
    Rejected(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::Rejected(message) => write!(f, "server rejected request: {message}"),
        }
    }
}

impl Error for TransportError {}

/// Board protocol operations.
#[async_trait]
pub trait BoardTransport: Send + Sync {
    /// `Query Boards` full snapshot.
    async fn fetch_boards(&self) -> TransportResult<Vec<BoardPayload>>;

    /// `Mutation CreateTask`; the created task starts in `TODO`.
    async fn create_task(&self, board_id: BoardId, title: &str)
        -> TransportResult<CreatedTaskPayload>;

    /// `Mutation MoveTask`; boolean acknowledgment.
    async fn move_task(&self, task_id: TaskId, status: TaskStatus) -> TransportResult<bool>;

    /// `Mutation DeleteTask`; boolean acknowledgment.
    async fn delete_task(&self, task_id: TaskId) -> TransportResult<bool>;

    /// `Mutation CreateBoard`.
    async fn create_board(&self, title: &str) -> TransportResult<CreatedBoardPayload>;

    /// `Mutation DeleteBoard`; boolean acknowledgment. The server drops the
    /// board's tasks with it.
    async fn delete_board(&self, board_id: BoardId) -> TransportResult<bool>;

    /// `Subscription TaskChanged(boardId)`.
    async fn subscribe_task_changed(&self, board_id: BoardId) -> TransportResult<TaskChangedStream>;
}

/// Sends one staged mutation over `transport`.
pub async fn send_mutation(
    transport: &dyn BoardTransport,
    request: &MutationRequest,
) -> TransportResult<MutationResponse> {
    match request {
        MutationRequest::CreateTask { board_id, title } => {
            let created = transport.create_task(*board_id, title).await?;
            Ok(MutationResponse::Created {
                id: created.id,
                title: created.title,
            })
        }
        MutationRequest::MoveTask { task_id, status } => transport
            .move_task(*task_id, *status)
            .await
            .map(MutationResponse::Acknowledged),
        MutationRequest::DeleteTask { task_id } => transport
            .delete_task(*task_id)
            .await
            .map(MutationResponse::Acknowledged),
        MutationRequest::CreateBoard { title } => {
            let created = transport.create_board(title).await?;
            Ok(MutationResponse::BoardCreated {
                id: created.id,
                title: created.title,
            })
        }
        MutationRequest::DeleteBoard { board_id } => transport
            .delete_board(*board_id)
            .await
            .map(MutationResponse::Acknowledged),
    }
}
