//! Authentication provider contract.
//!
//! The transport core does not perform the authentication handshake; it
//! only defines the capability it needs from one. A provider is consulted
//! once per new connection, before the connection is admitted into a
//! pool. A provider that cannot serve a host fails the attempt with
//! [`TransportError::AuthenticationRequired`](crate::TransportError::AuthenticationRequired) -
//! fatal to that connection attempt only, never to the pool.

use std::net::SocketAddr;

use crate::error::{Result, TransportError};

/// One connection's authentication capability.
pub trait Authenticator: Send + Sync {
    /// The initial SASL-style response opening the exchange.
    fn initial_response(&self) -> Result<Vec<u8>>;

    /// Answer a server challenge.
    fn evaluate_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Authenticator")
    }
}

/// Factory producing an [`Authenticator`] per target host.
pub trait AuthenticatorProvider: Send + Sync {
    /// Produce an authenticator for a connection to `addr`, or fail if
    /// authentication is required but unavailable.
    fn new_authenticator(&self, addr: SocketAddr) -> Result<Box<dyn Authenticator>>;
}

/// The default provider for clusters without authentication: any host
/// that demands credentials fails its connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthProvider;

impl AuthenticatorProvider for NoAuthProvider {
    fn new_authenticator(&self, addr: SocketAddr) -> Result<Box<dyn Authenticator>> {
        Err(TransportError::AuthenticationRequired(addr))
    }
}
