//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Client role: sample the sensors, publish to the monitor, keep the link up.
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use wq_common::{AppConfig, ReconnectMode};
use wq_msg::{ReadingSet, ReadingUpdate};
use wq_net::{
    AddressPolicy, CloseReason, Connection, ConnectionManager, ConnectionState, RetryPolicy,
};
use wq_rt::{Dispatch, Reactor, Registry, ShutdownHandle, Token, Wake};

use crate::producer::SampleProducer;
use crate::publisher::{PublishOutcome, TelemetryPublisher};
use crate::sampling::SamplingScheduler;
use crate::sink::{LinkEvent, SampleSink};

/// Totals reported when the node stops.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    /// Sampling ticks run.
    pub sampling_ticks: u64,
    /// Frames fully written.
    pub frames_sent: u64,
    /// Publish ticks skipped while disconnected or backpressured.
    pub frames_skipped: u64,
    /// Writes that broke the session.
    pub publish_failures: u64,
    /// Attempts the startup connect needed.
    pub startup_attempts: usize,
    /// Background connect attempts issued.
    pub reconnect_attempts: u64,
    /// Background attempts that restored the link.
    pub reconnects: u64,
    /// Sessions lost after startup.
    pub link_losses: u64,
    /// Readings at shutdown.
    pub final_readings: ReadingSet,
}

struct NodeContext {
    readings: ReadingSet,
    connection: Connection,
    producer: Box<dyn SampleProducer>,
    sink: Box<dyn SampleSink>,
    scheduler: SamplingScheduler,
    publisher: TelemetryPublisher,
    target: SocketAddr,
    reconnect: ReconnectMode,
    link: Option<Token>,
    pending_connect: Option<Token>,
    startup_attempts: usize,
    reconnect_attempts: u64,
    reconnects: u64,
    link_losses: u64,
}

impl NodeContext {
    fn sample(&mut self) {
        self.scheduler.tick(self.producer.as_mut(), &mut self.readings);
    }

    fn publish(&mut self, registry: &mut Registry<NodeContext>) {
        if let PublishOutcome::Failed(reason) =
            self.publisher.publish(&self.readings, &mut self.connection)
        {
            self.link_lost(registry, reason);
        }
    }

    fn display(&mut self) {
        let update = ReadingUpdate::from(self.readings);
        self.sink.accept(&update, &self.readings);
    }

    fn attach(&mut self, registry: &mut Registry<NodeContext>, stream: TcpStream) {
        let peer = stream.peer_addr().unwrap_or(self.target);
        let handle = self.connection.attach(stream, peer);
        match registry.add_stream("monitor-link", handle, |ctx, d, _| ctx.on_link_readable(d)) {
            Ok(token) => {
                self.link = Some(token);
                self.sink.link_event(&LinkEvent::Connected { peer });
            }
            Err(err) => {
                error!(error = %err, "unable to watch monitor link");
                self.connection.disconnect(CloseReason::Local);
            }
        }
    }

    fn on_link_readable(&mut self, dispatch: &mut Dispatch<'_, NodeContext>) {
        let drained = self.connection.drain();
        if drained.bytes > 0 {
            debug!(bytes = drained.bytes, frames = drained.events.len(), "ignoring inbound bytes from monitor");
        }
        if let Some(reason) = drained.closed {
            self.connection.disconnect(reason.clone());
            self.link_lost(dispatch.registry(), reason);
        }
    }

    fn link_lost(&mut self, registry: &mut Registry<NodeContext>, reason: CloseReason) {
        if let Some(token) = self.link.take() {
            registry.remove(token);
        }
        self.link_losses += 1;
        self.sink.link_event(&LinkEvent::Disconnected {
            peer: Some(self.target),
            reason: reason.to_string(),
        });
        match self.reconnect {
            ReconnectMode::Background => info!(%reason, "monitor link lost; reconnecting in background"),
            ReconnectMode::StartupOnly => warn!(%reason, "monitor link lost; reconnect disabled"),
        }
    }

    fn try_reconnect(&mut self, registry: &mut Registry<NodeContext>) {
        if self.connection.state() != ConnectionState::Disconnected || self.pending_connect.is_some() {
            return;
        }
        self.reconnect_attempts += 1;
        self.connection.begin_connect();
        let target = self.target;
        debug!(%target, attempt = self.reconnect_attempts, "reconnect attempt");
        let token = registry.add_connect("reconnect", TcpStream::connect(target), |ctx, d, wake| {
            ctx.on_connected(d.registry(), wake)
        });
        self.pending_connect = Some(token);
    }

    fn on_connected(&mut self, registry: &mut Registry<NodeContext>, wake: Wake) {
        self.pending_connect = None;
        match wake {
            Wake::Connected(Ok(stream)) => {
                info!(target = %self.target, attempt = self.reconnect_attempts, "monitor link restored");
                self.reconnects += 1;
                self.attach(registry, stream);
            }
            Wake::Connected(Err(err)) => {
                self.connection.connect_failed();
                debug!(target = %self.target, error = %err, "reconnect attempt failed");
                self.sink.link_event(&LinkEvent::ConnectFailed {
                    target: self.target,
                    error: err.to_string(),
                });
            }
            other => warn!(?other, "unexpected wake for pending connect"),
        }
    }

    fn summary(&self) -> NodeSummary {
        let publish = self.publisher.stats();
        NodeSummary {
            sampling_ticks: self.scheduler.stats().ticks,
            frames_sent: publish.sent,
            frames_skipped: publish.skipped(),
            publish_failures: publish.failures,
            startup_attempts: self.startup_attempts,
            reconnect_attempts: self.reconnect_attempts,
            reconnects: self.reconnects,
            link_losses: self.link_losses,
            final_readings: self.readings,
        }
    }
}

/// The node's reactor together with everything its callbacks touch.
pub struct NodeRuntime {
    reactor: Reactor<NodeContext>,
    context: NodeContext,
}

impl NodeRuntime {
    /// Resolve and validate the monitor address, connect under the bounded
    /// retry policy and register every node source.
    pub async fn start(
        config: &AppConfig,
        producer: Box<dyn SampleProducer>,
        sink: Box<dyn SampleSink>,
    ) -> Result<Self> {
        let address = config.node.resolve_address()?;
        let manager = ConnectionManager::new(RetryPolicy::new(
            config.connect.max_attempts,
            config.connect.retry_delay,
        ))
        .with_address_policy(AddressPolicy::new(config.node.permitted_range));
        let target = manager
            .target(&address, config.node.port)
            .context("invalid monitor address")?;

        info!(%target, max_attempts = config.connect.max_attempts, "connecting to monitor");
        let connected = manager
            .connect(target)
            .await
            .context("monitor unreachable")?;

        let mut runtime = Self::new(config, target, producer, sink)?;
        runtime.context.startup_attempts = connected.attempts;
        runtime.attach(connected.value);
        Ok(runtime)
    }

    /// Build the runtime with its timers registered but no link attached.
    pub fn new(
        config: &AppConfig,
        target: SocketAddr,
        producer: Box<dyn SampleProducer>,
        sink: Box<dyn SampleSink>,
    ) -> Result<Self> {
        let node = &config.node;
        let mut reactor: Reactor<NodeContext> = Reactor::with_capacity(config.reactor.event_capacity)?;
        reactor.add_timer("sampling", node.sampling_interval, |ctx, _, _| ctx.sample())?;
        reactor.add_timer("publish", node.publish_interval, |ctx, d, _| {
            ctx.publish(d.registry())
        })?;
        if let Some(period) = node.display_period() {
            reactor.add_timer("display", period, |ctx, _, _| ctx.display())?;
        }
        if config.connect.reconnect == ReconnectMode::Background {
            reactor.add_timer("reconnect", config.connect.retry_delay, |ctx, d, _| {
                ctx.try_reconnect(d.registry())
            })?;
        }

        let context = NodeContext {
            readings: ReadingSet::default(),
            connection: Connection::new(config.wire.max_ingest_bytes),
            producer,
            sink,
            scheduler: SamplingScheduler::new(node.temperature_failure),
            publisher: TelemetryPublisher::new(config.wire.format),
            target,
            reconnect: config.connect.reconnect,
            link: None,
            pending_connect: None,
            startup_attempts: 0,
            reconnect_attempts: 0,
            reconnects: 0,
            link_losses: 0,
        };
        Ok(Self { reactor, context })
    }

    /// Attach an established link to the monitor.
    pub fn attach(&mut self, stream: TcpStream) {
        self.context.attach(self.reactor.registry(), stream);
    }

    /// Monitor endpoint.
    pub fn target(&self) -> SocketAddr {
        self.context.target
    }

    /// True while the monitor link is up.
    pub fn is_connected(&self) -> bool {
        self.context.connection.is_connected()
    }

    /// Latest sampled readings.
    pub fn readings(&self) -> &ReadingSet {
        &self.context.readings
    }

    /// Handle that stops [`NodeRuntime::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Dispatch until stopped, then release the link and every source.
    pub async fn run(mut self) -> Result<NodeSummary> {
        info!(target = %self.context.target, format = ?self.context.publisher.format(), "node running");
        self.reactor
            .run(&mut self.context)
            .await
            .context("node reactor failed")?;
        self.context.connection.disconnect(CloseReason::Local);
        let summary = self.context.summary();
        info!(?summary, "node stopped");
        Ok(summary)
    }
}
