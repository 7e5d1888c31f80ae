//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use tracing::{debug, trace, warn};
use wq_msg::{encode, ReadingSet, WireFormat};
use wq_net::{CloseReason, Connection, SkipReason, WriteOutcome};

/// Counters kept across publish ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Frames fully written.
    pub sent: u64,
    /// Ticks with no link.
    pub skipped_not_connected: u64,
    /// Ticks dropped on a full send buffer.
    pub skipped_backpressure: u64,
    /// Writes that broke the session.
    pub failures: u64,
}

impl PublishStats {
    /// All skipped ticks.
    pub fn skipped(&self) -> u64 {
        self.skipped_not_connected + self.skipped_backpressure
    }
}

/// Result of one publish tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The frame went out; carries its length.
    Sent(usize),
    /// Nothing was written.
    Skipped(SkipReason),
    /// The write broke the session; the connection has been disconnected.
    Failed(CloseReason),
}

/// Encodes the current reading set and writes it to the link once per tick.
#[derive(Debug, Clone, Default)]
pub struct TelemetryPublisher {
    format: WireFormat,
    stats: PublishStats,
}

impl TelemetryPublisher {
    /// Publisher writing frames in `format`.
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            stats: PublishStats::default(),
        }
    }

    /// Frame encoding in use.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Counters so far.
    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Encode `readings` and write them as one frame.
    pub fn publish(&mut self, readings: &ReadingSet, connection: &mut Connection) -> PublishOutcome {
        if !connection.is_connected() {
            self.stats.skipped_not_connected += 1;
            trace!("link down; skipping publish");
            return PublishOutcome::Skipped(SkipReason::NotConnected);
        }
        let frame = encode(readings, self.format);
        match connection.write(frame.as_bytes()) {
            Ok(WriteOutcome::Sent(bytes)) => {
                self.stats.sent += 1;
                trace!(bytes, %frame, "published");
                PublishOutcome::Sent(bytes)
            }
            Ok(WriteOutcome::Skipped(reason)) => {
                match reason {
                    SkipReason::NotConnected => self.stats.skipped_not_connected += 1,
                    SkipReason::Backpressure => {
                        self.stats.skipped_backpressure += 1;
                        debug!("send buffer full; dropping this frame");
                    }
                }
                PublishOutcome::Skipped(reason)
            }
            Err(err) => {
                self.stats.failures += 1;
                warn!(error = %err, "publish failed; dropping session");
                let reason = CloseReason::from(&err);
                connection.disconnect(reason.clone());
                PublishOutcome::Failed(reason)
            }
        }
    }
}
