//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reactor loop and its cross-thread stop flag."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Single-threaded event dispatch for the node and monitor runtimes.
#![warn(missing_docs)]

/// Dispatch loop and registration table.
pub mod reactor;
/// Cross-thread stop flag.
pub mod shutdown;

pub use reactor::{
    Callback, Dispatch, Reactor, ReactorError, Registry, Result, Token, Wake,
    DEFAULT_EVENT_CAPACITY,
};
pub use shutdown::ShutdownHandle;
