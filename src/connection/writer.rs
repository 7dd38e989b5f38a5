//! Dedicated outbound writer task.
//!
//! Many caller tasks write requests to the same connection concurrently;
//! interleaved partial writes would corrupt frame boundaries. Instead of a
//! transport mutex, all outbound frames funnel through an mpsc channel into
//! one writer task, which also gets cheap batching: everything already
//! queued is drained and flushed in one pass.
//!
//! ```text
//! caller 1 ─┐
//! caller 2 ─┼─► mpsc::Sender<Bytes> ─► writer task ─► transport
//! caller N ─┘
//! ```

use std::sync::Weak;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use super::ConnectionInner;

/// Frames drained from the queue per flush.
const MAX_WRITE_BATCH: usize = 64;

/// Receive fully encoded frames and write them to the transport until the
/// channel closes, shutdown is signalled, or a write fails.
///
/// A write failure condemns the whole connection: the fault path (run at
/// most once, via the inner's take switch) fails every outstanding stream.
pub(super) async fn writer_loop<W>(
    mut transport: W,
    mut rx: mpsc::Receiver<Bytes>,
    inner: Weak<ConnectionInner>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            _ = shutdown.changed() => return,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let mut batch = Vec::with_capacity(8);
        batch.push(first);
        while batch.len() < MAX_WRITE_BATCH {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(err) = write_batch(&mut transport, &batch).await {
            tracing::debug!(error = %err, "outbound write failed");
            if let Some(inner) = inner.upgrade() {
                inner.fault(&format!("write failed: {err}"));
            }
            return;
        }
    }
}

async fn write_batch<W>(transport: &mut W, batch: &[Bytes]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for frame in batch {
        transport.write_all(frame).await?;
    }
    transport.flush().await
}
