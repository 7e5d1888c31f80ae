//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Server role: accept one node at a time and merge its frames.
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wq_common::AppConfig;
use wq_msg::ReadingSet;
use wq_net::{Admission, CloseReason, Connection, ConnectionManager};
use wq_rt::{Dispatch, Reactor, Registry, ShutdownHandle, Token, Wake};

use crate::ingest::StreamIngest;
use crate::sink::{LinkEvent, SampleSink};

/// Totals reported when the monitor stops.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSummary {
    /// Nodes admitted.
    pub sessions: u64,
    /// Peers turned away while a session was active.
    pub rejections: u64,
    /// Frames applied to the reading set.
    pub frames_decoded: u64,
    /// Malformed candidates dropped.
    pub parse_errors: u64,
    /// Ingest buffer overflows.
    pub overflows: u64,
    /// Merged readings at shutdown.
    pub final_readings: ReadingSet,
}

struct MonitorContext {
    readings: ReadingSet,
    connection: Connection,
    manager: ConnectionManager,
    ingest: StreamIngest,
    sink: Box<dyn SampleSink>,
    session: Option<Token>,
    rejections: u64,
}

impl MonitorContext {
    fn on_accept(&mut self, registry: &mut Registry<MonitorContext>, wake: Wake) {
        let (stream, peer) = match wake {
            Wake::Accepted { stream, peer } => (stream, peer),
            Wake::AcceptFailed(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
            other => {
                warn!(?other, "unexpected wake for listener");
                return;
            }
        };
        match self.manager.admit(&mut self.connection, stream, peer) {
            Admission::Accepted(handle) => {
                match registry.add_stream("node-session", handle, |ctx, d, _| ctx.on_readable(d)) {
                    Ok(token) => {
                        self.session = Some(token);
                        info!(%peer, "client connected");
                        self.sink.link_event(&LinkEvent::Connected { peer });
                    }
                    Err(err) => {
                        error!(%peer, error = %err, "unable to watch client session");
                        self.connection.disconnect(CloseReason::Local);
                    }
                }
            }
            Admission::Rejected { peer } => {
                self.rejections += 1;
                self.sink.link_event(&LinkEvent::Rejected { peer });
            }
        }
    }

    fn on_readable(&mut self, dispatch: &mut Dispatch<'_, MonitorContext>) {
        let report = self.ingest.on_readable(
            &mut self.connection,
            &mut self.readings,
            self.sink.as_mut(),
        );
        if report.closed.is_some() {
            dispatch.remove_self();
            self.session = None;
        }
    }

    fn summary(&self) -> MonitorSummary {
        let ingest = self.ingest.stats();
        MonitorSummary {
            sessions: self.connection.stats().sessions,
            rejections: self.rejections,
            frames_decoded: ingest.frames,
            parse_errors: ingest.malformed,
            overflows: ingest.overflows,
            final_readings: self.readings,
        }
    }
}

/// The monitor's reactor, its listener and the session state.
pub struct MonitorRuntime {
    reactor: Reactor<MonitorContext>,
    context: MonitorContext,
    local_addr: SocketAddr,
}

impl MonitorRuntime {
    /// Bind the listener and register it. A bind failure is a setup error.
    pub async fn bind(config: &AppConfig, mut sink: Box<dyn SampleSink>) -> Result<Self> {
        let monitor = &config.monitor;
        let listener = TcpListener::bind(monitor.listen)
            .await
            .with_context(|| format!("unable to listen on {}", monitor.listen))?;
        let local_addr = listener.local_addr().context("listener has no local address")?;

        let mut reactor: Reactor<MonitorContext> =
            Reactor::with_capacity(config.reactor.event_capacity)?;
        reactor.add_listener("listener", listener, |ctx, d, wake| {
            ctx.on_accept(d.registry(), wake)
        });

        info!(addr = %local_addr, "server started");
        sink.link_event(&LinkEvent::Listening { addr: local_addr });

        let context = MonitorContext {
            readings: ReadingSet::default(),
            connection: Connection::new(config.wire.max_ingest_bytes),
            manager: ConnectionManager::default()
                .with_rejection_message(monitor.rejection_message.clone()),
            ingest: StreamIngest::new(),
            sink,
            session: None,
            rejections: 0,
        };
        Ok(Self {
            reactor,
            context,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Merged readings so far.
    pub fn readings(&self) -> &ReadingSet {
        &self.context.readings
    }

    /// Handle that stops [`MonitorRuntime::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Dispatch until stopped, then close the session and the listener.
    pub async fn run(mut self) -> Result<MonitorSummary> {
        self.reactor
            .run(&mut self.context)
            .await
            .context("monitor reactor failed")?;
        if self.context.session.take().is_some() {
            let peer = self.context.connection.disconnect(CloseReason::Local);
            self.context.sink.link_event(&LinkEvent::Disconnected {
                peer,
                reason: CloseReason::Local.to_string(),
            });
        }
        let summary = self.context.summary();
        info!(?summary, "monitor stopped");
        Ok(summary)
    }
}
