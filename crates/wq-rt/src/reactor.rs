//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reactor loop and its cross-thread stop flag."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Readiness reactor multiplexing periodic timers and sockets on one thread.
//!
//! Every registered source owns a callback. A wake collects at most
//! `capacity` ready sources and runs their callbacks synchronously, in batch
//! order, with exclusive access to the caller's context. Callbacks may add or
//! remove sources (themselves included) through [`Dispatch`].
use std::fmt;
use std::future::{poll_fn, Future};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::shutdown::ShutdownHandle;

/// Ready sources handled per wake unless configured otherwise.
pub const DEFAULT_EVENT_CAPACITY: usize = 10;

/// Errors raised while registering sources or waiting for readiness.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// A source could not be registered.
    #[error("cannot register {label}: {reason}")]
    Registration {
        /// Label given at registration.
        label: &'static str,
        /// What was wrong with the source.
        reason: String,
    },
    /// Polling a source failed with something other than `Interrupted`.
    #[error("waiting on {label} failed: {source}")]
    Wait {
        /// Label of the failing source.
        label: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result type for registration and dispatch.
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Handle to a registered source. Tokens of removed sources never match a
/// later registration that reuses the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: usize,
    generation: u64,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// What made a source ready.
#[derive(Debug)]
pub enum Wake {
    /// A timer period elapsed.
    Tick,
    /// The stream has bytes (or EOF, or an error) to read.
    Readable,
    /// The listener accepted a peer.
    Accepted {
        /// The accepted socket.
        stream: TcpStream,
        /// Its remote address.
        peer: SocketAddr,
    },
    /// The listener failed to accept a peer.
    AcceptFailed(io::Error),
    /// A pending connect finished. The source is removed after this wake.
    Connected(io::Result<TcpStream>),
}

/// Callback invoked with the reactor context on each readiness.
pub type Callback<C> = Box<dyn FnMut(&mut C, &mut Dispatch<'_, C>, Wake)>;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>>>>;

enum Source {
    Timer(Interval),
    Stream(Rc<TcpStream>),
    Listener(TcpListener),
    Connect(ConnectFuture),
}

impl Source {
    fn kind(&self) -> &'static str {
        match self {
            Source::Timer(_) => "timer",
            Source::Stream(_) => "stream",
            Source::Listener(_) => "listener",
            Source::Connect(_) => "connect",
        }
    }

    fn poll_wake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Wake>> {
        match self {
            Source::Timer(interval) => interval.poll_tick(cx).map(|_| Ok(Wake::Tick)),
            Source::Stream(stream) => stream.poll_read_ready(cx).map_ok(|()| Wake::Readable),
            Source::Listener(listener) => listener.poll_accept(cx).map(|accepted| {
                Ok(match accepted {
                    Ok((stream, peer)) => Wake::Accepted { stream, peer },
                    Err(err) => Wake::AcceptFailed(err),
                })
            }),
            Source::Connect(pending) => pending.as_mut().poll(cx).map(|res| Ok(Wake::Connected(res))),
        }
    }
}

struct Entry<C> {
    label: &'static str,
    source: Source,
    callback: Option<Callback<C>>,
}

struct Slot<C> {
    generation: u64,
    entry: Option<Entry<C>>,
}

/// Registration table shared by the reactor and running callbacks.
pub struct Registry<C> {
    slots: Vec<Slot<C>>,
    free: Vec<usize>,
    shutdown: ShutdownHandle,
}

impl<C> Registry<C> {
    fn new(shutdown: ShutdownHandle) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            shutdown,
        }
    }

    fn insert(&mut self, label: &'static str, source: Source, callback: Callback<C>) -> Token {
        let kind = source.kind();
        let entry = Entry {
            label,
            source,
            callback: Some(callback),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };
        let token = Token {
            index,
            generation: self.slots[index].generation,
        };
        debug!(%token, label, kind, "source registered");
        token
    }

    fn entry(&self, token: Token) -> Option<&Entry<C>> {
        self.slots
            .get(token.index)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, token: Token) -> Option<&mut Entry<C>> {
        self.slots
            .get_mut(token.index)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Register a periodic timer. The first tick fires one `period` from now;
    /// missed ticks are skipped rather than bunched.
    pub fn add_timer<F>(&mut self, label: &'static str, period: Duration, callback: F) -> Result<Token>
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        if period.is_zero() {
            return Err(ReactorError::Registration {
                label,
                reason: "timer period must be greater than zero".into(),
            });
        }
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ok(self.insert(label, Source::Timer(interval), Box::new(callback)))
    }

    /// Register a connected stream for read readiness. Only one stream may be
    /// registered at a time.
    pub fn add_stream<F>(&mut self, label: &'static str, stream: Rc<TcpStream>, callback: F) -> Result<Token>
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        if let Some(existing) = self
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .find(|entry| matches!(entry.source, Source::Stream(_)))
        {
            return Err(ReactorError::Registration {
                label,
                reason: format!("stream '{}' is already registered", existing.label),
            });
        }
        Ok(self.insert(label, Source::Stream(stream), Box::new(callback)))
    }

    /// Register a listener; each accepted peer arrives as [`Wake::Accepted`].
    pub fn add_listener<F>(&mut self, label: &'static str, listener: TcpListener, callback: F) -> Token
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.insert(label, Source::Listener(listener), Box::new(callback))
    }

    /// Register a pending connect. The callback runs once with
    /// [`Wake::Connected`] and the source is then removed.
    pub fn add_connect<Fut, F>(&mut self, label: &'static str, connect: Fut, callback: F) -> Token
    where
        Fut: Future<Output = io::Result<TcpStream>> + 'static,
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.insert(label, Source::Connect(Box::pin(connect)), Box::new(callback))
    }

    /// Unregister a source, dropping its callback and handle. Returns `false`
    /// for stale tokens.
    pub fn remove(&mut self, token: Token) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(token.index)
            .filter(|slot| slot.generation == token.generation)
        else {
            return false;
        };
        let Some(entry) = slot.entry.take() else {
            return false;
        };
        slot.generation += 1;
        self.free.push(token.index);
        debug!(%token, label = entry.label, kind = entry.source.kind(), "source removed");
        true
    }

    /// True while `token` names a live source.
    pub fn contains(&self, token: Token) -> bool {
        self.entry(token).is_some()
    }

    /// Label of a live source.
    pub fn label(&self, token: Token) -> Option<&'static str> {
        self.entry(token).map(|entry| entry.label)
    }

    /// Live sources.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// True without live sources.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop switch shared with the reactor.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Stop the reactor after the current iteration.
    pub fn stop(&self) {
        self.shutdown.stop();
    }

    fn clear(&mut self) {
        for index in 0..self.slots.len() {
            let token = Token {
                index,
                generation: self.slots[index].generation,
            };
            self.remove(token);
        }
    }

    fn take_callback(&mut self, token: Token) -> Option<(Callback<C>, bool)> {
        let entry = self.entry_mut(token)?;
        let one_shot = matches!(entry.source, Source::Connect(_));
        entry.callback.take().map(|callback| (callback, one_shot))
    }

    fn restore_callback(&mut self, token: Token, callback: Callback<C>) {
        if let Some(entry) = self.entry_mut(token) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }
}

/// View handed to a running callback.
pub struct Dispatch<'a, C> {
    token: Token,
    registry: &'a mut Registry<C>,
}

impl<'a, C> Dispatch<'a, C> {
    /// Token of the source whose callback is running.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Registration table, for adding or removing sources.
    pub fn registry(&mut self) -> &mut Registry<C> {
        self.registry
    }

    /// Unregister the running source once its callback returns.
    pub fn remove_self(&mut self) -> bool {
        self.registry.remove(self.token)
    }

    /// Stop the reactor after the current iteration.
    pub fn stop(&self) {
        self.registry.stop();
    }
}

/// Single-threaded dispatch loop over a [`Registry`].
pub struct Reactor<C> {
    registry: Registry<C>,
    capacity: usize,
    cursor: usize,
}

impl<C> Default for Reactor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Reactor<C> {
    /// Empty reactor with [`DEFAULT_EVENT_CAPACITY`].
    pub fn new() -> Self {
        Self {
            registry: Registry::new(ShutdownHandle::new()),
            capacity: DEFAULT_EVENT_CAPACITY,
            cursor: 0,
        }
    }

    /// Empty reactor handling at most `capacity` ready sources per wake.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ReactorError::Registration {
                label: "reactor",
                reason: "event capacity must be at least 1".into(),
            });
        }
        Ok(Self {
            capacity,
            ..Self::new()
        })
    }

    /// Ready sources handled per wake.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registration table.
    pub fn registry(&mut self) -> &mut Registry<C> {
        &mut self.registry
    }

    /// See [`Registry::add_timer`].
    pub fn add_timer<F>(&mut self, label: &'static str, period: Duration, callback: F) -> Result<Token>
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.registry.add_timer(label, period, callback)
    }

    /// See [`Registry::add_stream`].
    pub fn add_stream<F>(&mut self, label: &'static str, stream: Rc<TcpStream>, callback: F) -> Result<Token>
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.registry.add_stream(label, stream, callback)
    }

    /// See [`Registry::add_listener`].
    pub fn add_listener<F>(&mut self, label: &'static str, listener: TcpListener, callback: F) -> Token
    where
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.registry.add_listener(label, listener, callback)
    }

    /// See [`Registry::add_connect`].
    pub fn add_connect<Fut, F>(&mut self, label: &'static str, connect: Fut, callback: F) -> Token
    where
        Fut: Future<Output = io::Result<TcpStream>> + 'static,
        F: FnMut(&mut C, &mut Dispatch<'_, C>, Wake) + 'static,
    {
        self.registry.add_connect(label, connect, callback)
    }

    /// See [`Registry::remove`].
    pub fn remove(&mut self, token: Token) -> bool {
        self.registry.remove(token)
    }

    /// Live sources.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// True without live sources.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Stop switch for [`Reactor::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.registry.shutdown_handle()
    }

    /// Stop after the current iteration.
    pub fn stop(&self) {
        self.registry.stop();
    }

    /// Dispatch until stopped, then release every source.
    pub async fn run(&mut self, ctx: &mut C) -> Result<()> {
        info!(sources = self.len(), capacity = self.capacity, "reactor running");
        let mut outcome = Ok(());
        while self.registry.shutdown.is_running() {
            if let Err(err) = self.turn(ctx).await {
                outcome = Err(err);
                break;
            }
        }
        self.registry.clear();
        info!("reactor stopped");
        outcome
    }

    /// Wait for one batch of ready sources and dispatch it. Returns the number
    /// of callbacks invoked; zero when the wait was interrupted by `stop`.
    pub async fn turn(&mut self, ctx: &mut C) -> Result<usize> {
        if !self.registry.shutdown.is_running() {
            return Ok(0);
        }
        let notify = self.registry.shutdown.notifier();
        let batch = tokio::select! {
            biased;
            _ = notify.notified() => return Ok(0),
            batch = poll_fn(|cx| self.poll_batch(cx)) => batch?,
        };
        Ok(self.dispatch(ctx, batch))
    }

    fn poll_batch(&mut self, cx: &mut Context<'_>) -> Poll<Result<Vec<(Token, Wake)>>> {
        let len = self.registry.slots.len();
        if len == 0 {
            return Poll::Pending;
        }
        let start = self.cursor % len;
        let mut batch = Vec::new();
        for offset in 0..len {
            let index = (start + offset) % len;
            let slot = &mut self.registry.slots[index];
            let generation = slot.generation;
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            match entry.source.poll_wake(cx) {
                Poll::Ready(Ok(wake)) => {
                    batch.push((Token { index, generation }, wake));
                    if batch.len() == self.capacity {
                        self.cursor = index + 1;
                        return Poll::Ready(Ok(batch));
                    }
                }
                Poll::Ready(Err(err)) if err.kind() == io::ErrorKind::Interrupted => {
                    cx.waker().wake_by_ref();
                }
                Poll::Ready(Err(source)) => {
                    return Poll::Ready(Err(ReactorError::Wait {
                        label: entry.label,
                        source,
                    }));
                }
                Poll::Pending => {}
            }
        }
        if batch.is_empty() {
            Poll::Pending
        } else {
            self.cursor = start + 1;
            Poll::Ready(Ok(batch))
        }
    }

    fn dispatch(&mut self, ctx: &mut C, batch: Vec<(Token, Wake)>) -> usize {
        let mut dispatched = 0;
        for (token, wake) in batch {
            let Some((mut callback, one_shot)) = self.registry.take_callback(token) else {
                trace!(%token, "dropping readiness for removed source");
                continue;
            };
            let mut dispatch = Dispatch {
                token,
                registry: &mut self.registry,
            };
            callback(ctx, &mut dispatch, wake);
            dispatched += 1;
            if one_shot {
                self.registry.remove(token);
            } else {
                self.registry.restore_callback(token, callback);
            }
        }
        dispatched
    }
}
