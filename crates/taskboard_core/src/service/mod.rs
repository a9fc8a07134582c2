//! Core use-case services.
//!
//! # Responsibility
//! - Turn user intents and remote events into store patches.
//! - Keep transport and runtime concerns out of the ordering rules.

pub mod drag;
pub mod event_merge;
pub mod mutation_applier;
pub mod reconciler;
