//! Integration tests for cqlmux.
//!
//! These exercise the layers together: frames through real connections,
//! pools over in-memory transports, and token-aware routing end to end.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use cqlmux::frame::{FrameHeader, HEADER_SIZE};
use cqlmux::pool::Connector;
use cqlmux::sync::TakeSwitch;
use cqlmux::{
    Connection, ConnectionConfig, Host, HostDistance, NodePool, Opcode, Partitioner, PoolConfig,
    Request, Token, TokenRing, TransportError,
};

fn test_addr(last: u8) -> std::net::SocketAddr {
    format!("10.1.1.{last}:9042").parse().unwrap()
}

fn quick_config(streams: usize) -> ConnectionConfig {
    ConnectionConfig {
        stream_count: streams,
        request_timeout: Duration::from_secs(2),
        ..ConnectionConfig::default()
    }
}

/// Serve echo responses: every request body comes back as a RESULT frame
/// on the same stream id.
async fn echo_server<S>(mut io: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let mut header_buf = [0u8; HEADER_SIZE];
        if io.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let header = match FrameHeader::decode(&header_buf) {
            Ok(h) => h,
            Err(_) => return,
        };
        let mut body = vec![0u8; header.body_length as usize];
        if io.read_exact(&mut body).await.is_err() {
            return;
        }

        let mut response = FrameHeader::request(
            header.version,
            0,
            header.stream,
            Opcode::Result,
            body.len() as u32,
        )
        .encode()
        .to_vec();
        response[0] = header.version.response_marker();
        response.extend_from_slice(&body);
        if io.write_all(&response).await.is_err() {
            return;
        }
        let _ = io.flush().await;
    }
}

struct EchoConnector;

impl Connector for EchoConnector {
    fn connect<'a>(
        &'a self,
        host: &'a Host,
    ) -> Pin<Box<dyn Future<Output = cqlmux::Result<Connection>> + Send + 'a>> {
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(echo_server(server));
            Ok(Connection::open(client, host.addr(), quick_config(128)))
        })
    }
}

#[tokio::test]
async fn many_concurrent_requests_each_get_their_own_response() {
    let (client, server) = tokio::io::duplex(256 * 1024);
    tokio::spawn(echo_server(server));
    let conn = Connection::open(client, test_addr(1), quick_config(128));

    let mut tasks = Vec::new();
    for i in 0..100u32 {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let body = Bytes::from(i.to_be_bytes().to_vec());
            let response = conn
                .send_request(&Request::new(Opcode::Query, body.clone()))
                .await
                .unwrap();
            assert_eq!(response.body, body, "request {i} got someone else's body");
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(conn.in_flight(), 0);
}

#[tokio::test]
async fn two_slots_filled_third_caller_backpressured() {
    let (client, _server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::open(client, test_addr(2), quick_config(2));

    // Occupy both stream ids with requests the server never answers.
    let a = conn.clone();
    let first = tokio::spawn(async move {
        a.send_request_timeout(
            &Request::new(Opcode::Query, Bytes::new()),
            Duration::from_millis(500),
        )
        .await
    });
    let b = conn.clone();
    let second = tokio::spawn(async move {
        b.send_request_timeout(
            &Request::new(Opcode::Query, Bytes::new()),
            Duration::from_millis(500),
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(conn.in_flight(), 2);

    // Third request is refused immediately, no blocking or timeout.
    let started = std::time::Instant::now();
    let third = conn
        .send_request(&Request::new(Opcode::Query, Bytes::new()))
        .await;
    assert!(matches!(third, Err(TransportError::StreamsExhausted)));
    assert!(started.elapsed() < Duration::from_millis(100));

    assert!(matches!(
        first.await.unwrap(),
        Err(TransportError::ConnectionTimeout)
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(TransportError::ConnectionTimeout)
    ));
}

#[tokio::test]
async fn transport_fault_fails_waiters_once_and_pool_occupancy_drops() {
    struct FlakyConnector {
        servers: std::sync::Mutex<Vec<tokio::io::DuplexStream>>,
    }

    impl Connector for FlakyConnector {
        fn connect<'a>(
            &'a self,
            host: &'a Host,
        ) -> Pin<Box<dyn Future<Output = cqlmux::Result<Connection>> + Send + 'a>> {
            Box::pin(async move {
                let (client, server) = tokio::io::duplex(64 * 1024);
                self.servers.lock().unwrap().push(server);
                Ok(Connection::open(client, host.addr(), quick_config(16)))
            })
        }
    }

    let connector = Arc::new(FlakyConnector {
        servers: std::sync::Mutex::new(Vec::new()),
    });
    let host = Arc::new(Host::new(test_addr(3), HostDistance::Local, Vec::new()));
    let pool = NodePool::connect(
        host,
        connector.clone(),
        PoolConfig {
            target_connections: 1,
            reconnect_interval: Duration::from_secs(60),
        },
    )
    .await;
    assert_eq!(pool.open_connections(), 1);

    // Park a request on the single connection; the server never answers.
    let conn = pool.pick().unwrap();
    let waiter = conn.clone();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let delivered = deliveries.clone();
    let pending = tokio::spawn(async move {
        let outcome = waiter
            .send_request(&Request::new(Opcode::Query, Bytes::from_static(b"q")))
            .await;
        delivered.fetch_add(1, Ordering::AcqRel);
        outcome
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.in_flight(), 1);

    // Kill the transport out from under the connection.
    connector.servers.lock().unwrap().clear();

    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(TransportError::ConnectionBroken(_))));
    assert_eq!(deliveries.load(Ordering::Acquire), 1);
    assert_eq!(pool.open_connections(), 0);
    assert_eq!(pool.in_flight(), 0);
    pool.close();
}

/// Transport whose read side stays healthy but whose write side starts
/// failing after a budget of successful writes.
struct FailingWriteTransport {
    io: tokio::io::DuplexStream,
    writes_left: usize,
}

impl AsyncRead for FailingWriteTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingWriteTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.writes_left == 0 {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write side gone",
            )));
        }
        this.writes_left -= 1;
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

#[tokio::test]
async fn write_failure_on_unrelated_write_fails_the_awaiting_caller_once() {
    struct OneWriteConnector;

    impl Connector for OneWriteConnector {
        fn connect<'a>(
            &'a self,
            host: &'a Host,
        ) -> Pin<Box<dyn Future<Output = cqlmux::Result<Connection>> + Send + 'a>> {
            Box::pin(async move {
                let (near, mut far) = tokio::io::duplex(64 * 1024);
                // Peer drains inbound frames but never answers.
                tokio::spawn(async move {
                    let mut sink = [0u8; 1024];
                    loop {
                        match far.read(&mut sink).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                    }
                });
                let transport = FailingWriteTransport {
                    io: near,
                    writes_left: 1,
                };
                Ok(Connection::open(transport, host.addr(), quick_config(16)))
            })
        }
    }

    let host = Arc::new(Host::new(test_addr(5), HostDistance::Local, Vec::new()));
    let pool = NodePool::connect(
        host,
        Arc::new(OneWriteConnector),
        PoolConfig {
            target_connections: 1,
            reconnect_interval: Duration::from_secs(60),
        },
    )
    .await;
    assert_eq!(pool.open_connections(), 1);

    // First request writes fine and parks awaiting its response.
    let conn = pool.pick().unwrap();
    let waiter = conn.clone();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let delivered = deliveries.clone();
    let parked = tokio::spawn(async move {
        let outcome = waiter
            .send_request(&Request::new(Opcode::Query, Bytes::from_static(b"parked")))
            .await;
        delivered.fetch_add(1, Ordering::AcqRel);
        outcome
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conn.in_flight(), 1);

    // A write on an unrelated stream fails; the fault must reach the
    // parked caller as a broken-connection error, exactly once.
    let failing = conn
        .send_request(&Request::new(Opcode::Query, Bytes::from_static(b"boom")))
        .await;
    assert!(failing.is_err());

    let outcome = parked.await.unwrap();
    assert!(matches!(outcome, Err(TransportError::ConnectionBroken(_))));
    assert_eq!(deliveries.load(Ordering::Acquire), 1);
    assert!(!conn.is_live());
    assert_eq!(pool.open_connections(), 0);
    pool.close();
}

#[tokio::test]
async fn pool_round_trips_under_concurrency() {
    let host = Arc::new(Host::new(test_addr(4), HostDistance::Local, Vec::new()));
    let pool = NodePool::connect(
        host,
        Arc::new(EchoConnector),
        PoolConfig {
            target_connections: 3,
            reconnect_interval: Duration::from_millis(100),
        },
    )
    .await;
    assert_eq!(pool.open_connections(), 3);

    let mut tasks = Vec::new();
    for i in 0..60u32 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let body = Bytes::from(format!("request-{i}"));
            let response = pool
                .send_request(&Request::new(Opcode::Query, body.clone()))
                .await
                .unwrap();
            assert_eq!(response.body, body);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(pool.in_flight(), 0);
    pool.close();
}

#[tokio::test]
async fn token_aware_routing_end_to_end() {
    // Three hosts, each owning a third of the murmur space.
    let hosts: Vec<Arc<Host>> = (0..3)
        .map(|i| {
            let token = Token::Murmur3((i as i64 - 1) * 3_000_000_000_000_000_000);
            Arc::new(Host::new(
                test_addr(10 + i as u8),
                HostDistance::Local,
                vec![token.clone()],
            ))
        })
        .collect();

    let entries = hosts
        .iter()
        .map(|h| (h.tokens()[0].clone(), h.clone()))
        .collect();
    let ring = Arc::new(TokenRing::new(Partitioner::Murmur3, entries).unwrap());

    // Deterministic ownership: identical key, identical owner, always.
    let key = b"user:31337";
    let token = Partitioner::Murmur3.hash(key);
    let owner = ring.primary_owner(&token).unwrap().unwrap();
    for _ in 0..5 {
        let again = ring.primary_owner(&Partitioner::Murmur3.hash(key)).unwrap().unwrap();
        assert_eq!(owner.addr(), again.addr());
    }

    // Route the request to the owner's pool and complete it there.
    let pool = NodePool::connect(
        owner.clone(),
        Arc::new(EchoConnector),
        PoolConfig {
            target_connections: 1,
            reconnect_interval: Duration::from_millis(100),
        },
    )
    .await;
    let response = pool
        .send_request(&Request::new(Opcode::Query, Bytes::from_static(key)))
        .await
        .unwrap();
    assert_eq!(&response.body[..], key);
    pool.close();
}

#[tokio::test]
async fn cross_partitioner_tokens_never_compared() {
    let md5_token = Partitioner::Random.hash(b"");
    let murmur_token = Partitioner::Murmur3.hash(b"");

    assert!(matches!(
        md5_token.try_cmp(&murmur_token),
        Err(TransportError::IncompatiblePartitioner)
    ));

    let host = Arc::new(Host::new(test_addr(20), HostDistance::Local, Vec::new()));
    let ring = TokenRing::new(Partitioner::Murmur3, vec![(murmur_token, host)]).unwrap();
    assert!(matches!(
        ring.owners(&md5_token, 1),
        Err(TransportError::IncompatiblePartitioner)
    ));
}

#[tokio::test]
async fn take_switch_single_winner_across_tasks() {
    let switch = Arc::new(TakeSwitch::new());
    let mut tasks = Vec::new();
    for _ in 0..64 {
        let switch = switch.clone();
        tasks.push(tokio::spawn(async move { switch.try_claim() }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(switch.is_claimed());
}
