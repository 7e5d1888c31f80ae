//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reactor loop and its cross-thread stop flag."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

/// Cloneable stop switch for a running reactor.
///
/// This is the only reactor object that may cross threads; signal listeners
/// hold a clone and call [`ShutdownHandle::stop`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Handle in the running state.
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Clear the running flag and wake an idle wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// False once [`ShutdownHandle::stop`] was called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Stop once `trigger` resolves. A failed trigger is logged and leaves
    /// the flag untouched. Returns whether the stop was issued.
    pub async fn stop_when<F>(self, trigger: F) -> bool
    where
        F: Future<Output = io::Result<()>>,
    {
        match trigger.await {
            Ok(()) => {
                self.stop();
                true
            }
            Err(err) => {
                error!(error = %err, "shutdown trigger failed; graceful shutdown unavailable");
                false
            }
        }
    }

    /// Wait for SIGINT or SIGTERM, then stop.
    pub async fn stop_on_signal(self) -> bool {
        self.stop_when(wait_for_termination()).await
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("ctrl-c received; shutting down");
        }
        _ = terminate.recv() => info!("SIGTERM received; shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> io::Result<()> {
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    Ok(())
}
