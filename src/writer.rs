//! Dedicated writer task for stream transports.
//!
//! Outbound messages are encoded on the caller's side and handed to a single
//! writer task over an mpsc channel, so concurrent handlers never contend for
//! the underlying `AsyncWrite`. The task batches whatever lines are queued
//! and flushes once per batch.
//!
//! # Architecture
//!
//! ```text
//! Manager   ─┐
//! Handler 1 ─┼─► mpsc::Sender<OutboundLine> ─► Writer Task ─► stdout / socket
//! Handler N ─┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::error::{BridgeError, Result};
use crate::protocol::Message;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum lines to write before flushing.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded message ready to be written.
#[derive(Debug)]
pub struct OutboundLine {
    /// JSON document followed by `\n`.
    pub bytes: Bytes,
}

impl OutboundLine {
    /// Encode a message.
    pub fn encode(message: &Message) -> Result<Self> {
        Ok(Self {
            bytes: Bytes::from(JsonCodec::encode_line(message)?),
        })
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Lines that may be queued before `send` reports [`BridgeError::ChannelFull`].
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for queueing messages on the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Encode and queue a message without waiting.
    ///
    /// Fails with `ChannelFull` when the queue is at capacity and with
    /// `ConnectionClosed` once the writer task has stopped.
    pub fn send(&self, message: &Message) -> Result<()> {
        let line = OutboundLine::encode(message)?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(line).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => BridgeError::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => BridgeError::ConnectionClosed,
            }
        })
    }

    /// Lines queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for queueing messages.
///
/// The task ends cleanly when every handle has been dropped, or with an
/// error if the underlying write fails.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundLine>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let Some(first) = rx.recv().await else {
            return Ok(());
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let written = write_batch(&mut writer, &batch).await;
        batch.clear();
        pending.fetch_sub(batch_size, Ordering::Release);

        if let Err(e) = written {
            tracing::error!(error = %e, "writer task stopped");
            return Err(e);
        }
    }
}

async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in batch {
        writer.write_all(&line.bytes).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    #[test]
    fn test_outbound_line_terminated() {
        let line = OutboundLine::encode(&Message::new("ping", None)).unwrap();
        assert_eq!(line.bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        let msg = Message::new("hello", None);
        handle.send(&msg).unwrap();

        let mut lines = BufReader::new(server).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(JsonCodec::decode(line.as_bytes()).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10 {
            handle.send(&Message::new(format!("m{i}"), None)).unwrap();
        }

        let mut lines = BufReader::new(server).lines();
        for i in 0..10 {
            let line = lines.next_line().await.unwrap().unwrap();
            let msg = JsonCodec::decode(line.as_bytes()).unwrap();
            assert_eq!(msg.message_type, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundLine>(1);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };

        handle.send(&Message::new("a", None)).unwrap();
        let result = handle.send(&Message::new("b", None));
        assert!(matches!(result, Err(BridgeError::ChannelFull)));
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_send_after_task_stopped() {
        let (tx, rx) = mpsc::channel::<OutboundLine>(4);
        drop(rx);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };

        let result = handle.send(&Message::new("a", None));
        assert!(matches!(result, Err(BridgeError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..3)
            .map(|i| OutboundLine::encode(&Message::new(format!("t{i}"), None)).unwrap())
            .collect();
        let total: usize = batch.iter().map(|line| line.bytes.len()).sum();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), total);
        assert_eq!(written.iter().filter(|&&b| b == b'\n').count(), 3);
    }

    #[tokio::test]
    async fn test_pending_drains() {
        let (client, _server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(&Message::new("x", None)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
