//! Newline-delimited JSON over an async byte stream.
//!
//! Each message is one compact JSON object followed by `\n`. Reading and
//! writing run on their own tasks: inbound lines are decoded and queued for
//! the subscriber, outbound messages go through the
//! [writer task](crate::writer).
//!
//! # Important
//!
//! - Malformed inbound lines are logged and skipped, never fatal
//! - EOF on the reader ends the inbound stream
//! - Logs belong on stderr when the stream is stdio
//!
//! # Example
//!
//! ```ignore
//! use panel_bridge::transport::StreamTransport;
//! use panel_bridge::CommunicationManager;
//!
//! let manager = CommunicationManager::builder()
//!     .build(StreamTransport::stdio())?;
//! manager.initialize().await?;
//! ```

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Inbound, Transport};
use crate::codec::JsonCodec;
use crate::error::{BridgeError, Result};
use crate::protocol::Message;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Transport over a reader/writer pair.
pub struct StreamTransport {
    writer: WriterHandle,
    inbound: Mutex<Option<Inbound>>,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl StreamTransport {
    /// Create a transport with the default writer configuration.
    ///
    /// Spawns the reader and writer tasks, so this must run inside a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, WriterConfig::default())
    }

    /// Create a transport with a custom writer configuration.
    pub fn with_config<R, W>(reader: R, writer: W, config: WriterConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(reader_loop(reader, tx));
        let (writer, writer_task) = spawn_writer_task(writer, config);

        Self {
            writer,
            inbound: Mutex::new(Some(rx)),
            reader_task,
            _writer_task: writer_task,
        }
    }

    /// Talk to the surface over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Outbound lines not yet written.
    pub fn pending_writes(&self) -> usize {
        self.writer.pending_count()
    }
}

impl Transport for StreamTransport {
    fn send(&self, message: Message) -> Result<()> {
        self.writer.send(&message)
    }

    fn subscribe(&self) -> Result<Inbound> {
        self.inbound.lock().take().ok_or(BridgeError::AlreadySubscribed)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn reader_loop<R>(reader: R, tx: mpsc::UnboundedSender<Message>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match JsonCodec::decode(line.as_bytes()) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            // Subscriber gone.
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, len = line.len(), "skipping malformed inbound line");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!("surface stream reached EOF");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "surface stream read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncWriteExt};

    #[tokio::test]
    async fn test_inbound_lines_decoded() {
        let (host_io, mut surface_io) = duplex(4096);
        let (r, w) = split(host_io);
        let transport = StreamTransport::new(r, w);
        let mut inbound = transport.subscribe().unwrap();

        surface_io
            .write_all(b"{\"id\":\"1\",\"type\":\"__ready__\"}\n")
            .await
            .unwrap();

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.id, "1");
        assert_eq!(msg.message_type, "__ready__");
    }

    #[tokio::test]
    async fn test_malformed_and_blank_lines_skipped() {
        let (host_io, mut surface_io) = duplex(4096);
        let (r, w) = split(host_io);
        let transport = StreamTransport::new(r, w);
        let mut inbound = transport.subscribe().unwrap();

        surface_io
            .write_all(b"garbage\n\n{\"id\":\"2\",\"type\":\"ping\"}\n")
            .await
            .unwrap();

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.id, "2");
    }

    #[tokio::test]
    async fn test_eof_ends_inbound() {
        let (host_io, surface_io) = duplex(4096);
        let (r, w) = split(host_io);
        let transport = StreamTransport::new(r, w);
        let mut inbound = transport.subscribe().unwrap();

        drop(surface_io);
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_outbound_written_as_line() {
        let (host_io, surface_io) = duplex(4096);
        let (r, w) = split(host_io);
        let transport = StreamTransport::new(r, w);

        let msg = Message::new("hello", None);
        transport.send(msg.clone()).unwrap();

        let mut lines = BufReader::new(surface_io).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(JsonCodec::decode(line.as_bytes()).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let (host_io, _surface_io) = duplex(64);
        let (r, w) = split(host_io);
        let transport = StreamTransport::new(r, w);

        assert!(transport.subscribe().is_ok());
        assert!(matches!(
            transport.subscribe(),
            Err(BridgeError::AlreadySubscribed)
        ));
    }
}
