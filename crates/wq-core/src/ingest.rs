//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use tracing::{debug, warn};
use wq_msg::{DecodeEvent, ReadingSet};
use wq_net::{CloseReason, Connection};

use crate::sink::{LinkEvent, SampleSink};

/// Counters kept across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Readiness wakes handled.
    pub wakes: u64,
    /// Bytes read.
    pub bytes: u64,
    /// Frames applied.
    pub frames: u64,
    /// Candidates that failed to parse.
    pub malformed: u64,
    /// Times the ingest cap discarded the buffer.
    pub overflows: u64,
}

/// Result of one readiness wake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Frames applied to the reading set during this wake.
    pub applied: usize,
    /// Set when the session ended; the connection is already disconnected.
    pub closed: Option<CloseReason>,
}

/// Applies frames arriving on the monitor's session to its reading set.
#[derive(Debug, Clone, Default)]
pub struct StreamIngest {
    stats: IngestStats,
}

impl StreamIngest {
    /// Ingest with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far.
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Drain the readable socket, apply every decoded update and report to
    /// `sink`. EOF or a read error disconnects the session.
    pub fn on_readable(
        &mut self,
        connection: &mut Connection,
        readings: &mut ReadingSet,
        sink: &mut dyn SampleSink,
    ) -> IngestReport {
        self.stats.wakes += 1;
        let drained = connection.drain();
        self.stats.bytes += drained.bytes as u64;
        let mut report = IngestReport::default();

        for event in drained.events {
            match event {
                DecodeEvent::Reading(update) => {
                    let changed = readings.apply(&update);
                    self.stats.frames += 1;
                    report.applied += 1;
                    debug!(changed, "frame applied");
                    sink.accept(&update, readings);
                }
                DecodeEvent::Malformed { candidate, error } => {
                    self.stats.malformed += 1;
                    warn!(%candidate, %error, "json parse error; frame dropped");
                    sink.link_event(&LinkEvent::MalformedFrame { candidate, error });
                }
                DecodeEvent::Overflow { discarded } => {
                    self.stats.overflows += 1;
                    warn!(discarded, "ingest buffer overflow; unframed bytes discarded");
                    sink.link_event(&LinkEvent::Overflow { discarded });
                }
            }
        }

        if let Some(reason) = drained.closed {
            let peer = connection.disconnect(reason.clone());
            sink.link_event(&LinkEvent::Disconnected {
                peer,
                reason: reason.to_string(),
            });
            report.closed = Some(reason);
        }
        report
    }
}
