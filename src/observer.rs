//! Request-tracking observer contract.
//!
//! External telemetry hooks around the lifecycle of a logical request and
//! of each per-node attempt, so a collector can instrument the transport
//! without the transport knowing about it. All hooks default to no-ops;
//! implementors override what they care about.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::TransportError;

/// Lifecycle hooks for one logical request and its node attempts.
///
/// A logical request may span several node attempts under an external
/// retry policy; the `on_request_*` pair fires once overall, the
/// `on_node_*` pair once per attempt.
pub trait RequestObserver: Send + Sync {
    /// A logical request is starting.
    fn on_request_start(&self) {}

    /// The logical request completed successfully.
    fn on_request_success(&self, _elapsed: Duration) {}

    /// The logical request failed overall.
    fn on_request_error(&self, _error: &TransportError) {}

    /// One node attempt succeeded.
    fn on_node_success(&self, _node: SocketAddr, _elapsed: Duration) {}

    /// One node attempt failed.
    fn on_node_error(&self, _node: SocketAddr, _error: &TransportError) {}
}

/// Observer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {}
