//! Cluster hosts as the routing layer sees them.

use std::net::SocketAddr;

use super::partitioner::Token;

/// How a load-balancing policy should treat a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostDistance {
    /// Same datacenter, preferred.
    #[default]
    Local,
    /// Reachable but remote.
    Remote,
    /// Never routed to.
    Ignored,
}

/// One cluster node.
///
/// Hosts are published by the topology layer as immutable snapshots; a
/// refresh replaces the snapshot rather than mutating it in place, so
/// routing reads need no synchronization.
#[derive(Debug, Clone)]
pub struct Host {
    addr: SocketAddr,
    distance: HostDistance,
    tokens: Vec<Token>,
}

impl Host {
    /// Describe a host at `addr` owning `tokens`.
    pub fn new(addr: SocketAddr, distance: HostDistance, tokens: Vec<Token>) -> Self {
        Self {
            addr,
            distance,
            tokens,
        }
    }

    /// Transport address of the node.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Distance classification for policy decisions.
    pub fn distance(&self) -> HostDistance {
        self.distance
    }

    /// Ring tokens this host owns.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}
