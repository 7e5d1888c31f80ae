//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Local consumers of readings and link status.
use std::io::Write;
use std::net::SocketAddr;

use serde::Serialize;
use tracing::{info, warn};
use wq_msg::{ReadingSet, ReadingUpdate};

/// Link status changes reported alongside readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The monitor is accepting connections.
    Listening {
        /// Bound listen address.
        addr: SocketAddr,
    },
    /// A session started.
    Connected {
        /// Remote end of the session.
        peer: SocketAddr,
    },
    /// A peer was turned away because a session is active.
    Rejected {
        /// The rejected peer.
        peer: SocketAddr,
    },
    /// A session ended.
    Disconnected {
        /// Remote end, when it was known.
        peer: Option<SocketAddr>,
        /// Why the session closed.
        reason: String,
    },
    /// A background connect attempt failed.
    ConnectFailed {
        /// Monitor endpoint.
        target: SocketAddr,
        /// Socket error text.
        error: String,
    },
    /// A candidate frame could not be parsed.
    MalformedFrame {
        /// The dropped candidate text.
        candidate: String,
        /// Parser message.
        error: String,
    },
    /// The ingest cap discarded buffered bytes.
    Overflow {
        /// Bytes thrown away.
        discarded: usize,
    },
}

/// Consumer of reading updates.
pub trait SampleSink {
    /// `update` holds the fields that changed; `current` is the merged set.
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet);

    /// Link status change. Ignored unless overridden.
    fn link_event(&mut self, _event: &LinkEvent) {}
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet) {
        (**self).accept(update, current)
    }

    fn link_event(&mut self, event: &LinkEvent) {
        (**self).link_event(event)
    }
}

/// Emits one structured tracing line per update.
#[derive(Debug, Clone)]
pub struct LogSink {
    role: &'static str,
}

impl LogSink {
    /// Sink tagging each line with `role`.
    pub fn new(role: &'static str) -> Self {
        Self { role }
    }
}

impl SampleSink for LogSink {
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet) {
        info!(
            role = self.role,
            fields = update.field_count(),
            turbidity = current.turbidity(),
            temperature = current.temperature(),
            ph = current.ph(),
            "readings"
        );
    }

    fn link_event(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::MalformedFrame { .. } | LinkEvent::Overflow { .. } => {
                warn!(role = self.role, ?event, "link event")
            }
            _ => info!(role = self.role, ?event, "link event"),
        }
    }
}

#[derive(Serialize)]
struct ReadingLine<'a> {
    tur: f64,
    tmp: f64,
    #[serde(rename = "pH")]
    ph: f64,
    updated: &'a [&'static str],
}

/// Writes one JSON object per line: merged readings and link events.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    failed: bool,
}

impl<W: Write> JsonLinesSink<W> {
    /// Sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failed: false,
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, value: &T) {
        let written = serde_json::to_writer(&mut self.writer, value)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        match written {
            Ok(()) => self.failed = false,
            Err(err) if !self.failed => {
                self.failed = true;
                warn!(error = %err, "json lines output failed");
            }
            Err(_) => {}
        }
    }
}

impl<W: Write> SampleSink for JsonLinesSink<W> {
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet) {
        let mut updated = Vec::with_capacity(3);
        if update.turbidity.is_some() {
            updated.push("tur");
        }
        if update.temperature.is_some() {
            updated.push("tmp");
        }
        if update.ph.is_some() {
            updated.push("pH");
        }
        self.write_line(&ReadingLine {
            tur: current.turbidity(),
            tmp: current.temperature(),
            ph: current.ph(),
            updated: &updated,
        });
    }

    fn link_event(&mut self, event: &LinkEvent) {
        self.write_line(event);
    }
}

/// Forwards everything to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn SampleSink>>,
}

impl FanoutSink {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sink`.
    pub fn with(mut self, sink: impl SampleSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Append an already boxed sink.
    pub fn push(&mut self, sink: Box<dyn SampleSink>) {
        self.sinks.push(sink);
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// True without sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SampleSink for FanoutSink {
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet) {
        for sink in &mut self.sinks {
            sink.accept(update, current);
        }
    }

    fn link_event(&mut self, event: &LinkEvent) {
        for sink in &mut self.sinks {
            sink.link_event(event);
        }
    }
}
