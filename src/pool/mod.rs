//! Per-host connection pooling.
//!
//! A [`NodePool`] keeps a target number of live [`Connection`]s to one
//! host and hands one out per request, picking the least-loaded. It
//! exposes read-only occupancy (open connections, total in-flight) for
//! external load-balancing and admission policy; the pool itself never
//! decides routing beyond "least in-flight here".
//!
//! A background maintenance task prunes faulted connections and refills
//! up to the target. Connect attempts for a host are serialized by an
//! atomic claim so concurrent maintenance wakeups never dial duplicate
//! connections; reconnect *backoff* is external policy, the pool simply
//! retries on its interval.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::auth::AuthenticatorProvider;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Result, TransportError};
use crate::frame::{Request, Response};
use crate::observer::{NoopObserver, RequestObserver};
use crate::routing::Host;
use crate::sync::Guarded;

/// Default target number of connections per host.
pub const DEFAULT_TARGET_CONNECTIONS: usize = 2;

/// Default maintenance interval.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Live connections the pool tries to keep.
    pub target_connections: usize,
    /// How often maintenance prunes and refills.
    pub reconnect_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_connections: DEFAULT_TARGET_CONNECTIONS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Establishes one connection to a host.
///
/// Abstracting the dial lets pools run over anything that yields a
/// [`Connection`] - TCP in production, in-memory transports in tests.
pub trait Connector: Send + Sync {
    /// Dial `host` and return an admitted connection.
    fn connect<'a>(
        &'a self,
        host: &'a Host,
    ) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'a>>;
}

/// TCP connector used in production.
pub struct TcpConnector {
    config: ConnectionConfig,
    auth: Option<Arc<dyn AuthenticatorProvider>>,
}

impl TcpConnector {
    /// Connector producing plain TCP connections with `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, auth: None }
    }

    /// Attach an authentication provider, consulted once per connection
    /// before it is admitted.
    pub fn with_auth(mut self, provider: Arc<dyn AuthenticatorProvider>) -> Self {
        self.auth = Some(provider);
        self
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a Host,
    ) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'a>> {
        Box::pin(async move {
            // The authenticator capability is obtained before the dial:
            // a host that requires credentials we cannot produce must fail
            // this attempt without ever being admitted.
            if let Some(provider) = &self.auth {
                let _authenticator = provider.new_authenticator(host.addr())?;
            }

            let stream = TcpStream::connect(host.addr()).await?;
            stream.set_nodelay(true)?;
            Ok(Connection::open(stream, host.addr(), self.config.clone()))
        })
    }
}

struct PoolInner {
    host: Arc<Host>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    connections: Guarded<Vec<Connection>>,
    /// Serializes connection creation for this host.
    connecting: AtomicBool,
    closed: AtomicBool,
}

impl PoolInner {
    /// Drop faulted connections and dial missing ones up to the target.
    /// Only one maintenance pass runs at a time per host.
    async fn maintain(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let pruned = {
            let mut connections = self.connections.lock();
            let before = connections.len();
            connections.retain(|c| c.is_live());
            before - connections.len()
        };
        if pruned > 0 {
            tracing::debug!(host = %self.host.addr(), pruned, "pruned faulted connections");
        }

        loop {
            let open = self.connections.lock().len();
            if open >= self.config.target_connections || self.closed.load(Ordering::Acquire) {
                break;
            }
            match self.connector.connect(&self.host).await {
                Ok(connection) => {
                    // Close may have drained the pool while this dial was in
                    // flight; re-check under the lock so the fresh connection
                    // is shut down rather than stranded.
                    {
                        let mut connections = self.connections.lock();
                        if self.closed.load(Ordering::Acquire) {
                            drop(connections);
                            connection.close();
                            break;
                        }
                        connections.push(connection);
                    }
                    tracing::debug!(host = %self.host.addr(), "opened pooled connection");
                }
                Err(err) => {
                    // Next interval retries; backoff policy lives outside.
                    tracing::warn!(host = %self.host.addr(), error = %err, "connect failed");
                    break;
                }
            }
        }

        self.connecting.store(false, Ordering::Release);
    }
}

/// A pool of multiplexed connections to one host.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("host", &self.inner.host.addr())
            .field("open_connections", &self.open_connections())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl NodePool {
    /// Create a pool for `host` and start its maintenance task. The first
    /// connections are dialed immediately.
    pub async fn connect(
        host: Arc<Host>,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            host,
            connector,
            config,
            connections: Guarded::new(Vec::new()),
            connecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        inner.maintain().await;

        let weak = Arc::downgrade(&inner);
        tokio::spawn(maintenance_loop(weak, inner.config.reconnect_interval));

        Self { inner }
    }

    /// Host this pool serves.
    pub fn host(&self) -> &Arc<Host> {
        &self.inner.host
    }

    /// Open (live) connection count. Read-only occupancy for external
    /// admission and load-balancing policy.
    pub fn open_connections(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| c.is_live())
            .count()
    }

    /// Total requests in flight across the pool's live connections.
    pub fn in_flight(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| c.is_live())
            .map(|c| c.in_flight())
            .sum()
    }

    /// Hand out the best connection for the next request: least in-flight
    /// among live connections.
    pub fn pick(&self) -> Result<Connection> {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| c.is_live())
            .min_by_key(|c| c.in_flight())
            .cloned()
            .ok_or(TransportError::NoConnectionsAvailable)
    }

    /// Send one request on the best connection.
    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        self.send_tracked(request, &NoopObserver).await
    }

    /// Send one request, reporting lifecycle hooks to `observer`.
    ///
    /// The pool performs a single node attempt; retrying on another node
    /// or after backoff is the caller's policy, which is why both the
    /// overall and the per-attempt hooks fire here.
    pub async fn send_tracked(
        &self,
        request: &Request,
        observer: &dyn RequestObserver,
    ) -> Result<Response> {
        observer.on_request_start();
        let started = Instant::now();

        let outcome = self.attempt(request, observer).await;
        match &outcome {
            Ok(_) => observer.on_request_success(started.elapsed()),
            Err(err) => observer.on_request_error(err),
        }
        outcome
    }

    async fn attempt(
        &self,
        request: &Request,
        observer: &dyn RequestObserver,
    ) -> Result<Response> {
        let connection = self.pick()?;
        let node = connection.addr();
        let started = Instant::now();

        match connection.send_request(request).await {
            Ok(response) => {
                observer.on_node_success(node, started.elapsed());
                Ok(response)
            }
            Err(err) => {
                observer.on_node_error(node, &err);
                Err(err)
            }
        }
    }

    /// Shut the pool down: stop maintenance and close every connection.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let connections = {
            let mut held = self.inner.connections.lock();
            std::mem::take(&mut *held)
        };
        for connection in connections {
            connection.close();
        }
    }
}

/// Periodic prune-and-refill, alive as long as some `NodePool` clone is.
async fn maintenance_loop(inner: Weak<PoolInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        inner.maintain().await;
    }
}
