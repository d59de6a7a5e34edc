//! Wire contracts for FleetRun.
//!
//! This crate contains:
//! - JSON request/response messages for every RPC
//! - Route builders shared by the server and clients
//! - Converters between domain types and wire messages

pub mod convert;
pub mod messages;
pub mod routes;

pub use messages::*;
