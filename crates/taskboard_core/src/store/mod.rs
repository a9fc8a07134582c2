//! Normalized board store.
//!
//! # Responsibility
//! - Hold the single current `BoardSnapshot` shown to the UI.
//! - Express every change as a total `Patch` applied through one path.
//! - Publish each committed snapshot to observers.
//!
//! # Invariants
//! - Snapshots are immutable once published.
//! - A patch whose target is absent is a no-op, never an error.
//! - No task references a board absent from the same snapshot.

pub mod board_store;
pub mod patch;
pub mod snapshot;
