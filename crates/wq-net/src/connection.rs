//! ---
//! wq_section: "03-networking"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Connection management for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use wq_msg::{DecodeEvent, FrameDecoder};

use crate::NetError;

const READ_CHUNK: usize = 1024;

/// Lifecycle of the telemetry socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A peer is attached.
    Connected,
    /// Tearing down: the ingest buffer is being cleared and the socket released.
    Draining,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side (read returned zero bytes).
    PeerClosed,
    /// Reading failed.
    ReadFailed(ErrorKind),
    /// Writing failed.
    WriteFailed(ErrorKind),
    /// A frame was cut short by a full send buffer.
    PartialWrite,
    /// The local side shut down.
    Local,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed the connection"),
            CloseReason::ReadFailed(kind) => write!(f, "read failed ({})", kind),
            CloseReason::WriteFailed(kind) => write!(f, "write failed ({})", kind),
            CloseReason::PartialWrite => f.write_str("partial frame write"),
            CloseReason::Local => f.write_str("closed locally"),
        }
    }
}

impl From<&NetError> for CloseReason {
    fn from(err: &NetError) -> Self {
        match err {
            NetError::PartialWrite { .. } => CloseReason::PartialWrite,
            NetError::Io(io) => CloseReason::WriteFailed(io.kind()),
            _ => CloseReason::Local,
        }
    }
}

/// Why a write was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No peer attached.
    NotConnected,
    /// The send buffer was full before any byte went out.
    Backpressure,
}

/// Result of [`Connection::write`] when the link is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole frame was handed to the kernel.
    Sent(usize),
    /// Nothing was written.
    Skipped(SkipReason),
}

/// Everything read by one [`Connection::drain`] call.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Bytes read from the socket.
    pub bytes: usize,
    /// Decoder output for those bytes.
    pub events: Vec<DecodeEvent>,
    /// Set when the session can no longer be used; the caller must disconnect.
    pub closed: Option<CloseReason>,
}

/// Per-connection counters, kept across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Peers attached so far.
    pub sessions: u64,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Frames fully written.
    pub frames_sent: u64,
}

/// Owned telemetry socket plus its ingest buffer.
///
/// The stream handle is shared with the reactor registration through `Rc`;
/// both live on the dispatch thread.
#[derive(Debug)]
pub struct Connection {
    stream: Option<Rc<TcpStream>>,
    peer: Option<SocketAddr>,
    state: ConnectionState,
    decoder: FrameDecoder,
    stats: ConnectionStats,
}

impl Connection {
    /// Disconnected connection whose ingest buffer holds at most `max_ingest_bytes`.
    pub fn new(max_ingest_bytes: usize) -> Self {
        Self {
            stream: None,
            peer: None,
            state: ConnectionState::Disconnected,
            decoder: FrameDecoder::with_limit(max_ingest_bytes),
            stats: ConnectionStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a peer is attached.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Endpoint of the attached peer.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Ingest buffer and its counters.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Mark a connect attempt as in flight. Ignored unless disconnected.
    pub fn begin_connect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Return to `Disconnected` after a failed connect attempt.
    pub fn connect_failed(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Attach a freshly connected or accepted stream. Returns the shared
    /// handle to register with the reactor.
    pub fn attach(&mut self, stream: TcpStream, peer: SocketAddr) -> Rc<TcpStream> {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "unable to disable nagle");
        }
        let stream = Rc::new(stream);
        self.stream = Some(Rc::clone(&stream));
        self.peer = Some(peer);
        self.state = ConnectionState::Connected;
        self.decoder.clear();
        self.stats.sessions += 1;
        info!(%peer, session = self.stats.sessions, "connection established");
        stream
    }

    /// Write one whole frame without blocking.
    ///
    /// A full send buffer before the first byte skips the frame. Stalling
    /// after part of it has gone out is a [`NetError::PartialWrite`]; the
    /// caller must then disconnect because the peer's framing is broken.
    pub fn write(&mut self, frame: &[u8]) -> Result<WriteOutcome, NetError> {
        let Some(stream) = self.stream.as_ref().filter(|_| self.is_connected()) else {
            return Ok(WriteOutcome::Skipped(SkipReason::NotConnected));
        };
        let mut written = 0;
        while written < frame.len() {
            match stream.try_write(&frame[written..]) {
                Ok(0) => return Err(NetError::Io(io::Error::from(ErrorKind::WriteZero))),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if written == 0 {
                        return Ok(WriteOutcome::Skipped(SkipReason::Backpressure));
                    }
                    self.stats.bytes_written += written as u64;
                    return Err(NetError::PartialWrite {
                        written,
                        expected: frame.len(),
                    });
                }
                Err(err) => return Err(NetError::Io(err)),
            }
        }
        self.stats.bytes_written += written as u64;
        self.stats.frames_sent += 1;
        Ok(WriteOutcome::Sent(written))
    }

    /// Read until the socket would block, feeding everything through the
    /// ingest buffer.
    pub fn drain(&mut self) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        let Some(stream) = self.stream.as_ref().filter(|_| self.is_connected()) else {
            return outcome;
        };
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    outcome.closed = Some(CloseReason::PeerClosed);
                    break;
                }
                Ok(n) => {
                    outcome.bytes += n;
                    outcome.events.extend(self.decoder.feed(&buf[..n]));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(peer = ?self.peer, error = %err, "read failed");
                    outcome.closed = Some(CloseReason::ReadFailed(err.kind()));
                    break;
                }
            }
        }
        self.stats.bytes_read += outcome.bytes as u64;
        outcome
    }

    /// Drop the session: clear the ingest buffer, release the socket and
    /// return to `Disconnected`. Returns the peer that was attached.
    pub fn disconnect(&mut self, reason: CloseReason) -> Option<SocketAddr> {
        if self.stream.is_none() && self.state != ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            return None;
        }
        self.state = ConnectionState::Draining;
        let pending = self.decoder.pending().len();
        self.decoder.clear();
        self.stream = None;
        let peer = self.peer.take();
        self.state = ConnectionState::Disconnected;
        info!(peer = ?peer, %reason, discarded = pending, "connection closed");
        peer
    }
}
