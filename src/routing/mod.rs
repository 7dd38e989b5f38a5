//! Token-aware routing: partitioners, tokens, hosts, and the ring.
//!
//! The routing layer answers one question deterministically: given a
//! partition key, which host(s) own it. Callers hash the key with the
//! cluster's [`Partitioner`], then ask the published [`TokenRing`]
//! snapshot for the owners.

mod host;
mod partitioner;
mod ring;

pub use host::{Host, HostDistance};
pub use partitioner::{Partitioner, Token};
pub use ring::TokenRing;
