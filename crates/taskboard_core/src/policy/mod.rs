//! Conflict resolution between optimistic local state and pushed events.

pub mod consistency;
