//! Client library for the FleetRun control plane.
//!
//! Wraps every RPC of the control plane's HTTP surface in a typed method.

pub mod error;
pub mod http;

pub use error::ClientError;
pub use http::HttpClient;
