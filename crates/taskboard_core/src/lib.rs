//! Core client logic for the realtime task board.
//! This crate is the single source of truth for store and ordering invariants.

pub mod config;
pub mod logging;
pub mod model;
pub mod policy;
pub mod service;
pub mod store;
pub mod sync;

pub use config::{ClientConfig, ConfigError};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::board::{Board, BoardId, Task, TaskId, TaskStatus, TaskValidationError};
pub use model::event::{ScopedEvent, TaskChanged};
pub use model::mutation::{
    EntityId, IssuedMutation, MutationRequest, MutationResponse, MutationToken,
};
pub use policy::consistency::{ConsistencyPolicy, PendingKey};
pub use service::drag::{DragError, DragState, DragStateMachine, MoveIntent};
pub use service::event_merge::{EventMergeHandler, MergeOutcome, MergeStats};
pub use service::mutation_applier::{MutationError, PendingKind, Settlement, StagedMove};
pub use service::reconciler::Reconciler;
pub use store::board_store::BoardStore;
pub use store::patch::{Patch, PatchEffect};
pub use store::snapshot::{BoardSnapshot, BoardView, ColumnView};
pub use sync::client::{BoardClient, ClientError, DropOutcome};
pub use sync::memory::{Fault, MemoryBoardServer};
pub use sync::transport::{BoardTransport, TransportError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
