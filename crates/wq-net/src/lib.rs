//! ---
//! wq_section: "03-networking"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Connection management for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Connection management for the telemetry link.
//!
//! The client side validates the monitor address and dials it under a bounded
//! retry policy; the server side admits a single session at a time. Both sides
//! share [`Connection`], which owns the socket handle and the ingest buffer.
#![warn(missing_docs)]

pub mod address;
pub mod connection;
pub mod manager;
pub mod retry;

use std::io;
use std::net::SocketAddr;

pub use address::{parse_ipv4, AddressError, AddressPolicy};
pub use connection::{
    CloseReason, Connection, ConnectionState, ConnectionStats, DrainOutcome, SkipReason,
    WriteOutcome,
};
pub use manager::{Admission, ConnectionManager};
pub use retry::{Exhausted, Retried, RetryPolicy};

/// Shared result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors raised by the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The configured monitor address is unusable.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// Every connect attempt failed.
    #[error("unable to reach {target} after {attempts} attempts: {last}")]
    ConnectExhausted {
        /// Endpoint that was dialled.
        target: SocketAddr,
        /// Attempts made, each with a fresh socket.
        attempts: usize,
        /// Error from the final attempt.
        #[source]
        last: io::Error,
    },
    /// The socket stalled after part of a frame went out; framing is broken.
    #[error("wrote {written} of {expected} bytes before the socket stalled")]
    PartialWrite {
        /// Bytes accepted by the kernel.
        written: usize,
        /// Frame length.
        expected: usize,
    },
    /// Any other socket failure.
    #[error("socket i/o failed: {0}")]
    Io(#[from] io::Error),
}
