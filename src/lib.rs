//! # cqlmux
//!
//! Transport core for a Cassandra-style wire protocol client: multiplexes
//! many concurrent logical requests over a small set of persistent
//! connections per node, and routes requests to the replicas that own
//! them via consistent-hash partitioning.
//!
//! ## Architecture
//!
//! - [`frame`] - wire frame header, codec, and inbound reassembly
//! - [`connection`] - one multiplexed connection: stream id allocation,
//!   single reader task, serialized writer task, fault handling
//! - [`pool`] - per-host pools with least-in-flight selection and
//!   occupancy for external load-balancing policy
//! - [`routing`] - partitioners, tokens, and the token ring
//! - [`sync`] - the atomic state primitives everything above builds on
//! - [`auth`] / [`observer`] - the authentication and request-tracking
//!   contracts consumed from outside the core
//!
//! Statement construction, result deserialization, retry policy, and
//! topology discovery are external collaborators; the core only exposes
//! the primitives they need (host distance, occupancy, token ownership).
//!
//! ## Example
//!
//! ```ignore
//! use cqlmux::{NodePool, PoolConfig, Request, Opcode, TcpConnector, ConnectionConfig};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> cqlmux::Result<()> {
//!     let host = Arc::new(cqlmux::Host::new(
//!         "10.0.0.1:9042".parse().unwrap(),
//!         cqlmux::HostDistance::Local,
//!         Vec::new(),
//!     ));
//!     let connector = Arc::new(TcpConnector::new(ConnectionConfig::default()));
//!     let pool = NodePool::connect(host, connector, PoolConfig::default()).await;
//!
//!     let response = pool
//!         .send_request(&Request::new(Opcode::Query, Bytes::from_static(b"...")))
//!         .await?;
//!     println!("opcode: {:?}", response.opcode());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod connection;
pub mod error;
pub mod frame;
pub mod observer;
pub mod pool;
pub mod routing;
pub mod sync;

pub use auth::{Authenticator, AuthenticatorProvider, NoAuthProvider};
pub use connection::{Connection, ConnectionConfig};
pub use error::{Result, TransportError};
pub use frame::{Compression, CompressionCodec, Opcode, ProtocolVersion, Request, Response};
pub use observer::{NoopObserver, RequestObserver};
pub use pool::{Connector, NodePool, PoolConfig, TcpConnector};
pub use routing::{Host, HostDistance, Partitioner, Token, TokenRing};
