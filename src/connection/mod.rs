//! One multiplexed connection.
//!
//! A [`Connection`] makes a single ordered, full-duplex byte transport look
//! like up to 128 independent request/response channels. Each request
//! claims a stream id from the [`StreamTable`], writes one frame through
//! the shared writer task, and suspends on a oneshot completion until the
//! connection's single reader task dispatches the matching response back.
//!
//! Responses arrive in whatever order the server produces them; only the
//! stream id ties one to its caller. Within a stream id at most one
//! completion is ever delivered.

mod streams;
mod writer;

pub use streams::{StreamTable, DEFAULT_STREAMS, MAX_STREAMS};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Result, TransportError};
use crate::frame::{CompressionCodec, FrameBuffer, FrameCodec, ProtocolVersion, RawFrame, Request, Response};
use crate::sync::{AtomicCell, TakeSwitch};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// Read buffer size for the reader task.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Configuration for a single connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Protocol version spoken on this connection.
    pub version: ProtocolVersion,
    /// Stream ids available, `1..=128`.
    pub stream_count: usize,
    /// Largest inbound frame body accepted before the connection is
    /// condemned.
    pub max_body_size: u32,
    /// Negotiated body compression, if any.
    pub compression: Option<Arc<dyn CompressionCodec>>,
    /// Timeout applied by [`Connection::send_request`].
    pub request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            stream_count: DEFAULT_STREAMS,
            max_body_size: crate::frame::DEFAULT_MAX_BODY_SIZE,
            compression: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("version", &self.version)
            .field("stream_count", &self.stream_count)
            .field("max_body_size", &self.max_body_size)
            .field("compression", &self.compression.as_ref().map(|c| c.kind()))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

pub(crate) struct ConnectionInner {
    addr: SocketAddr,
    version: ProtocolVersion,
    codec: FrameCodec,
    streams: StreamTable,
    writer_tx: mpsc::Sender<bytes::Bytes>,
    /// Guarantees the fault path runs exactly once even when a read error
    /// and a write error land simultaneously.
    fault_switch: TakeSwitch,
    live: AtomicBool,
    fault_reason: AtomicCell<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionInner {
    /// Condemn the connection: mark it not-live, stop both tasks, and fail
    /// every outstanding stream with a connection-broken error. Idempotent
    /// under races - only the take-switch winner does the walk.
    pub(crate) fn fault(&self, reason: &str) {
        if !self.fault_switch.try_claim() {
            return;
        }
        tracing::debug!(addr = %self.addr, reason, "connection faulted");
        self.live.store(false, Ordering::Release);
        self.fault_reason.set(Some(reason.to_string()));
        let _ = self.shutdown_tx.send(true);
        self.streams.fail_all(reason);
    }
}

/// A live multiplexed connection to one host.
///
/// Cheap to clone; all clones share the same transport and stream table.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    request_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("live", &self.is_live())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Connection {
    /// Wrap an established transport, spawning the reader and writer tasks.
    pub fn open<T>(transport: T, addr: SocketAddr, config: ConnectionConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (writer_tx, writer_rx) = mpsc::channel(config.stream_count.clamp(1, MAX_STREAMS) * 2);
        let (shutdown_tx, _) = watch::channel(false);

        let codec = match &config.compression {
            Some(compression) => FrameCodec::with_compression(compression.clone()),
            None => FrameCodec::new(),
        };

        let inner = Arc::new(ConnectionInner {
            addr,
            version: config.version,
            codec,
            streams: StreamTable::new(config.stream_count),
            writer_tx,
            fault_switch: TakeSwitch::new(),
            live: AtomicBool::new(true),
            fault_reason: AtomicCell::new(None),
            shutdown_tx,
        });

        tokio::spawn(writer::writer_loop(
            write_half,
            writer_rx,
            Arc::downgrade(&inner),
            inner.shutdown_tx.subscribe(),
        ));
        tokio::spawn(reader_loop(
            read_half,
            Arc::downgrade(&inner),
            inner.shutdown_tx.subscribe(),
            config.max_body_size,
        ));

        Self {
            inner,
            request_timeout: config.request_timeout,
        }
    }

    /// Send one request and await its response, using the configured
    /// per-request timeout.
    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        self.send_request_timeout(request, self.request_timeout)
            .await
    }

    /// Send one request and await its response with an explicit timeout.
    ///
    /// Stream exhaustion fails fast with
    /// [`TransportError::StreamsExhausted`] - no waiting, route elsewhere.
    /// A timeout cancels only this request's stream; the connection and
    /// every other stream keep working. The cancelled id is withheld from
    /// reuse until the server's late response arrives and is discarded, so
    /// it can never be delivered to a later request on the same id.
    pub async fn send_request_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response> {
        if !self.is_live() {
            return Err(self.broken_error());
        }

        let reservation = self.inner.streams.reserve()?;
        let id = reservation.id();
        let frame =
            self.inner
                .codec
                .encode_request(request, id, self.inner.version, request.compress)?;

        // Arm before the write hits the wire: the response could otherwise
        // arrive while the slot is still only Reserved.
        let (tx, rx) = oneshot::channel();
        let generation = reservation.arm(tx)?;

        if self.inner.writer_tx.send(frame).await.is_err() {
            self.inner.streams.cancel(id, generation);
            return Err(self.broken_error());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without completing: fault path lost the race
            // to our arm but the connection is gone either way.
            Ok(Err(_)) => Err(self.broken_error()),
            Err(_) => {
                self.inner.streams.cancel(id, generation);
                Err(TransportError::ConnectionTimeout)
            }
        }
    }

    /// Whether the connection accepts new requests.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Requests currently awaiting responses on this connection.
    pub fn in_flight(&self) -> usize {
        self.inner.streams.in_flight()
    }

    /// Stream ids this connection multiplexes.
    pub fn stream_capacity(&self) -> usize {
        self.inner.streams.capacity()
    }

    /// Remote address of the transport.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Shut the connection down. Outstanding requests fail with a
    /// connection-broken error; repeated calls are no-ops.
    pub fn close(&self) {
        self.inner.fault("closed by owner");
    }

    fn broken_error(&self) -> TransportError {
        let reason = self
            .inner
            .fault_reason
            .get()
            .unwrap_or_else(|| "connection is shut down".to_string());
        TransportError::ConnectionBroken(reason)
    }
}

/// The single inbound reader: drains the transport, reassembles frames,
/// and hands each one to the stream slot it belongs to.
async fn reader_loop<R>(
    mut transport: R,
    inner: Weak<ConnectionInner>,
    mut shutdown: watch::Receiver<bool>,
    max_body_size: u32,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = FrameBuffer::with_max_body(max_body_size);
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => return,
            read = transport.read(&mut read_buf) => read,
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };

        let n = match read {
            Ok(0) => {
                inner.fault("connection closed by peer");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                inner.fault(&format!("read failed: {err}"));
                return;
            }
        };

        // Framing errors are fatal: after one, later frame boundaries are
        // unknowable.
        let frames = match buffer.push(&read_buf[..n]) {
            Ok(frames) => frames,
            Err(err) => {
                inner.fault(&err.to_string());
                return;
            }
        };

        for frame in frames {
            dispatch_frame(&inner, frame);
        }
    }
}

/// Route one reassembled frame to its awaiting stream slot.
fn dispatch_frame(inner: &ConnectionInner, frame: RawFrame) {
    let header = frame.header;

    if header.is_event() {
        // Server-pushed events (topology, status) belong to the control
        // layer, not to any request stream.
        tracing::debug!(addr = %inner.addr, stream = header.stream, "ignoring server event frame");
        return;
    }
    if !header.is_response() {
        tracing::warn!(
            addr = %inner.addr,
            stream = header.stream,
            "request-direction frame from server, discarding"
        );
        return;
    }

    // A bad body (e.g. failed decompression) fails only this stream's
    // caller; the framing itself was sound, so the connection survives.
    let outcome = inner.codec.decode_body(header, frame.body);

    if !inner.streams.complete(header.stream, outcome) {
        // Either the late answer a timed-out request was still owed (its
        // arrival frees the orphaned id) or a response nobody asked for;
        // nothing else on the connection is affected either way.
        tracing::debug!(
            addr = %inner.addr,
            stream = header.stream,
            "response for idle stream id, discarding"
        );
    }
}
