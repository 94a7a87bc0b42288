//! Beam presence registry.
//!
//! Tracks which endpoints are currently reachable and pushes the full
//! membership set to every registered client whenever it changes.

pub mod connection;
pub mod registry;

pub use registry::{BroadcastReport, ConnectionHandle, Registry};
