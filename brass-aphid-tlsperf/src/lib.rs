//! Handshake throughput benchmarking for TLS over TCP and DTLS over UDP.
//!
//! A [`Driver`] repeatedly connects a fresh [`ClientEndpoint`] to a fresh
//! [`ServerEndpoint`] on the loopback, waits for both secure-sessions to be
//! established and reports the aggregate timing as a [`Report`].

pub mod cli;
pub mod context;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod key_log;
pub mod report;

#[cfg(test)]
mod testing;

pub use context::{ContextConfig, SecureContext, Transport};
pub use driver::{Driver, Flow, RunConfig};
pub use endpoint::{ClientEndpoint, Endpoint, EndpointEvent, EndpointState, Role, ServerEndpoint};
pub use error::{Error, TransportOp};
pub use identity::{Identity, SigType};
pub use report::Report;
