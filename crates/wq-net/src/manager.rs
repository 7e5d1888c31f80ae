//! ---
//! wq_section: "03-networking"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Connection management for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::future::Future;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4};
use std::rc::Rc;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use wq_common::config::DEFAULT_REJECTION_MESSAGE;

use crate::address::AddressPolicy;
use crate::connection::Connection;
use crate::retry::{Retried, RetryPolicy};
use crate::{NetError, Result};

/// Outcome of offering an inbound peer to the active session.
#[derive(Debug)]
pub enum Admission {
    /// The peer became the active session; register the handle for reads.
    Accepted(Rc<TcpStream>),
    /// Another session was active; the peer was told so and closed.
    Rejected {
        /// Endpoint of the rejected peer.
        peer: SocketAddr,
    },
}

/// Establishes outbound sessions and gates inbound ones.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    address_policy: AddressPolicy,
    retry: RetryPolicy,
    rejection_message: String,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ConnectionManager {
    /// Manager with the given retry policy and no address range restriction.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            address_policy: AddressPolicy::default(),
            retry,
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_owned(),
        }
    }

    /// Restrict outbound targets.
    pub fn with_address_policy(mut self, policy: AddressPolicy) -> Self {
        self.address_policy = policy;
        self
    }

    /// Text sent to peers turned away by [`ConnectionManager::admit`].
    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// Retry policy used by [`ConnectionManager::connect`].
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Validate the address text and pair it with `port`.
    pub fn target(&self, address: &str, port: u16) -> Result<SocketAddr> {
        let ip = self.address_policy.validate(address)?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }

    /// Dial `target` under the retry policy, one fresh socket per attempt.
    pub async fn connect(&self, target: SocketAddr) -> Result<Retried<TcpStream>> {
        self.connect_via(target, |addr| TcpStream::connect(addr)).await
    }

    /// [`ConnectionManager::connect`] with a caller-supplied dialler.
    pub async fn connect_via<T, F, Fut>(&self, target: SocketAddr, mut connector: F) -> Result<Retried<T>>
    where
        F: FnMut(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        self.retry
            .run("connect", |_| connector(target))
            .await
            .map_err(|exhausted| NetError::ConnectExhausted {
                target,
                attempts: exhausted.attempts,
                last: exhausted.last_error,
            })
    }

    /// Admit `stream` as the active session unless one is already attached.
    ///
    /// A rejected peer gets the rejection message and is closed; the active
    /// session is left untouched.
    pub fn admit(&self, active: &mut Connection, stream: TcpStream, peer: SocketAddr) -> Admission {
        if active.is_connected() {
            match self.reject(stream) {
                Ok(n) if n == self.rejection_message.len() => {}
                Ok(n) => warn!(%peer, written = n, "rejection message truncated"),
                Err(err) => warn!(%peer, error = %err, "unable to send rejection message"),
            }
            info!(%peer, active = ?active.peer(), "rejected additional client");
            return Admission::Rejected { peer };
        }
        Admission::Accepted(active.attach(stream, peer))
    }

    /// Write the rejection message straight to the socket and close it.
    ///
    /// A freshly accepted stream has no write readiness recorded yet, so the
    /// write bypasses the runtime's readiness cache.
    fn reject(&self, stream: TcpStream) -> io::Result<usize> {
        let mut socket = stream.into_std()?;
        let written = socket.write(self.rejection_message.as_bytes())?;
        if let Err(err) = socket.shutdown(Shutdown::Write) {
            debug!(error = %err, "rejected socket already closed");
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::AddressError;

    #[tokio::test(start_paused = true)]
    async fn exhausted_connect_reports_attempts() {
        let manager = ConnectionManager::default();
        let target = manager.target("192.168.1.2", 8888).unwrap();
        let dials = Cell::new(0);
        let started = Instant::now();
        let err = manager
            .connect_via(target, |_| {
                dials.set(dials.get() + 1);
                async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            })
            .await
            .unwrap_err();
        match err {
            NetError::ConnectExhausted {
                target: failed,
                attempts,
                last,
            } => {
                assert_eq!(failed, target);
                assert_eq!(attempts, 3);
                assert_eq!(last.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("unexpected error {}", other),
        }
        assert_eq!(dials.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_success_is_reported() {
        let manager = ConnectionManager::new(RetryPolicy::new(3, Duration::from_secs(1)));
        let target = manager.target("10.0.0.5", 9000).unwrap();
        let dials = Cell::new(0);
        let connected = manager
            .connect_via(target, |addr| {
                dials.set(dials.get() + 1);
                let attempt = dials.get();
                async move {
                    if attempt == 1 {
                        Err(io::Error::from(io::ErrorKind::TimedOut))
                    } else {
                        Ok(addr)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(connected.attempts, 2);
        assert_eq!(connected.value, target);
    }

    #[test]
    fn target_enforces_address_policy() {
        let manager = ConnectionManager::default();
        assert!(matches!(
            manager.target("192.168.1.256", 8888),
            Err(NetError::Address(AddressError::OctetRange { .. }))
        ));
        assert_eq!(
            manager.target("192.168.1.9", 8888).unwrap(),
            "192.168.1.9:8888".parse::<SocketAddr>().unwrap()
        );
    }
}
