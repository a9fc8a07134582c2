//! Normalized domain model for boards, tasks and local mutations.
//!
//! # Responsibility
//! - Define identifiers, task/board records and the status column enum.
//! - Define the pushed `TaskChanged` event and mutation request/response shapes.
//!
//! # Invariants
//! - Server-assigned ids are positive; locally minted placeholder ids are negative.
//! - A task belongs to exactly one board (`Task::board_id`).
//! - Titles stored in the model are normalized and never blank.

pub mod board;
pub mod event;
pub mod mutation;
