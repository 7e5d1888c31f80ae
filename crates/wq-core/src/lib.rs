//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Sampling, publishing and ingest for the water-quality link, plus the node
//! and monitor runtimes that wire them into a single-threaded reactor.
#![warn(missing_docs)]

/// Monitor-side frame ingest.
pub mod ingest;
/// Server runtime.
pub mod monitor;
/// Client runtime.
pub mod node;
/// Sensor access.
pub mod producer;
/// Outbound frame publishing.
pub mod publisher;
/// Periodic sampling into the reading set.
pub mod sampling;
/// Local consumers of readings and link events.
pub mod sink;

pub use ingest::{IngestReport, IngestStats, StreamIngest};
pub use monitor::{MonitorRuntime, MonitorSummary};
pub use node::{NodeRuntime, NodeSummary};
pub use producer::{
    ph_value, turbidity_percent, AcquisitionError, AnalogSample, Channel, SampleProducer,
};
pub use publisher::{PublishOutcome, PublishStats, TelemetryPublisher};
pub use sampling::{SamplingScheduler, SamplingStats, TickReport};
pub use sink::{FanoutSink, JsonLinesSink, LinkEvent, LogSink, SampleSink};
