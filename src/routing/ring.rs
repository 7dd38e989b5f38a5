//! The token ring: ordered token-to-host mapping.
//!
//! A [`TokenRing`] is built once from a topology snapshot and never
//! mutated; refreshes publish a whole new ring (typically behind an
//! `Arc`), so lookups are plain unsynchronized reads. Entries are sorted
//! ascending by token and the space wraps: the successor of the largest
//! token is the smallest.

use std::sync::Arc;

use super::host::Host;
use super::partitioner::{Partitioner, Token};
use crate::error::{Result, TransportError};

/// Immutable, ascending-sorted (token, owning host) ring.
#[derive(Debug, Clone)]
pub struct TokenRing {
    partitioner: Partitioner,
    entries: Vec<(Token, Arc<Host>)>,
}

impl TokenRing {
    /// Build a ring from a topology snapshot.
    ///
    /// Every entry must carry a token of `partitioner`'s space; a stray
    /// token from another partitioner is rejected rather than sorted into
    /// a nonsensical order.
    pub fn new(partitioner: Partitioner, mut entries: Vec<(Token, Arc<Host>)>) -> Result<Self> {
        for (token, _) in &entries {
            if token.partitioner() != partitioner {
                return Err(TransportError::IncompatiblePartitioner);
            }
        }
        entries.sort_by(|a, b| {
            a.0.try_cmp(&b.0)
                .expect("ring entries share one partitioner")
        });
        Ok(Self {
            partitioner,
            entries,
        })
    }

    /// The partitioner whose tokens this ring is keyed by.
    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    /// Number of ring entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hosts owning `token`, primary first.
    ///
    /// Locates the first entry whose token is >= the query (wrapping to
    /// the first entry past the largest token), then walks forward
    /// collecting up to `replicas` distinct hosts. Expanding `replicas`
    /// according to a replication strategy is the caller's policy; this is
    /// the primitive it consumes.
    pub fn owners(&self, token: &Token, replicas: usize) -> Result<Vec<Arc<Host>>> {
        if token.partitioner() != self.partitioner {
            return Err(TransportError::IncompatiblePartitioner);
        }
        if self.entries.is_empty() || replicas == 0 {
            return Ok(Vec::new());
        }

        let start = self
            .entries
            .partition_point(|(t, _)| {
                t.try_cmp(token).expect("ring validated at construction") == std::cmp::Ordering::Less
            });

        let mut owners: Vec<Arc<Host>> = Vec::with_capacity(replicas);
        for offset in 0..self.entries.len() {
            let (_, host) = &self.entries[(start + offset) % self.entries.len()];
            if !owners.iter().any(|h| h.addr() == host.addr()) {
                owners.push(host.clone());
                if owners.len() == replicas {
                    break;
                }
            }
        }
        Ok(owners)
    }

    /// The single host owning the range `token` falls into, if any.
    pub fn primary_owner(&self, token: &Token) -> Result<Option<Arc<Host>>> {
        Ok(self.owners(token, 1)?.into_iter().next())
    }
}
