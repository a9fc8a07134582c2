//! Network side of the board client: transport contract, wire payloads,
//! an in-process server and the async driver.

pub mod client;
pub mod memory;
pub mod transport;
pub mod wire;
