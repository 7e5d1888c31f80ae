//! ---
//! wq_section: "02-messaging-data-model"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reading model and frame codec for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Reading-set data model and the wire codec shared by the node and the monitor.
#![warn(missing_docs)]

pub mod codec;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while building or decoding telemetry frames.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// A reading carried NaN or an infinity.
    #[error("non-finite value for {field}: {value}")]
    NonFinite {
        /// Field name as used on the wire.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// A candidate frame could not be parsed as a flat reading object.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub use codec::{
    decode_frame, encode, DecodeEvent, DecoderStats, FrameDecoder, WireFormat,
    DEFAULT_MAX_INGEST_BYTES,
};
pub use types::{ReadingSet, ReadingUpdate, TEMPERATURE_SENTINEL};
