//! # Connection Module
//!
//! Chooses which server address the client talks to.
//!
//! ## Overview
//!
//! - [`ConnectionArbiter`] races identity probes across endpoint candidates
//!   (local first) and publishes the first responder
//! - [`ActiveEndpoint`] holds the selected endpoint; only the arbiter writes it
//! - [`ServerContext`] builds authorized requests against the active endpoint
//! - [`HttpEndpointProber`] probes candidates through the host `HttpClient`

pub mod arbiter;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod prober;

pub use arbiter::ConnectionArbiter;
pub use config::ConnectionConfig;
pub use context::ServerContext;
pub use endpoint::{ActiveEndpoint, Endpoint, EndpointCandidate};
pub use error::{ConnectionError, ProbeFailure, RaceError, Result};
pub use prober::{EndpointProber, HttpEndpointProber};
