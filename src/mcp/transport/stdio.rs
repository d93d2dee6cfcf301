//! stdio transport.
//!
//! - stdin: framed messages from the client, line or `Content-Length` form
//! - stdout: replies and notifications, one JSON object per line
//! - stderr: logging only, never protocol traffic
//!
//! # Thread Safety
//!
//! A dedicated reader task decodes frames into a bounded queue so the
//! processing loop stays responsive to cancellation while stdin blocks.
//! Each request is dispatched on its own task, so replies may leave in a
//! different order than the requests arrived.
//! Every write to stdout goes through [`StdioWriter`], which holds a lock for
//! the whole message so concurrent writers never interleave bytes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::framing::FrameReader;
use super::{Transport, TransportKind};
use crate::error::{FrameError, TransportError};
use crate::mcp::dispatch::dispatch;
use crate::mcp::handler::{RequestContext, ServerInfo, SharedHandler};
use crate::mcp::protocol::{JsonRpcError, OutgoingNotification};

/// Tunables for the stdio transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioSettings {
    /// Frames buffered between the reader task and the processing loop.
    pub inbound_queue: usize,
    /// Pause before reading again after end of input.
    pub eof_retry: Duration,
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            inbound_queue: 10,
            eof_retry: Duration::from_millis(100),
        }
    }
}

/// Serialised, flushed writes of line-form messages.
#[derive(Debug)]
pub struct StdioWriter<W> {
    inner: Arc<tokio::sync::Mutex<W>>,
}

impl<W> Clone for StdioWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W> StdioWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a byte sink.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }

    /// Writes one message followed by a newline and flushes.
    ///
    /// Messages containing raw newlines are compacted first so the line
    /// framing holds.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub async fn write_message(&self, message: &[u8]) -> io::Result<()> {
        let compacted;
        let message = if message.contains(&b'\n') {
            compacted = compact(message);
            compacted.as_slice()
        } else {
            message
        };

        let mut writer = self.inner.lock().await;
        writer.write_all(message).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Writes a server-initiated notification.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub async fn write_notification(&self, notification: &OutgoingNotification) -> io::Result<()> {
        self.write_message(&notification.to_bytes()).await
    }
}

/// Re-encodes pretty-printed JSON on one line. Raw newlines in valid JSON
/// are always insignificant whitespace.
fn compact(message: &[u8]) -> Vec<u8> {
    serde_json::from_slice::<Value>(message)
        .and_then(|value| serde_json::to_vec(&value))
        .unwrap_or_else(|_| {
            message
                .iter()
                .copied()
                .filter(|b| *b != b'\n' && *b != b'\r')
                .collect()
        })
}

/// A stdio-based MCP transport.
///
/// Reads framed messages from `R` and writes replies to `W`; by default the
/// process's stdin and stdout.
pub struct StdioTransport<R = BufReader<Stdin>, W = Stdout> {
    reader: Mutex<Option<R>>,
    writer: StdioWriter<W>,
    settings: StdioSettings,
}

impl StdioTransport {
    /// Creates a transport over the process's standard streams.
    #[must_use]
    pub fn new() -> Self {
        Self::with_streams(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over arbitrary streams.
    pub fn with_streams(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: StdioWriter::new(writer),
            settings: StdioSettings::default(),
        }
    }

    /// Replaces the default tunables.
    #[must_use]
    pub fn with_settings(mut self, settings: StdioSettings) -> Self {
        self.settings = StdioSettings {
            inbound_queue: settings.inbound_queue.max(1),
            ..settings
        };
        self
    }

    /// A handle for writing server-initiated messages to the output stream.
    #[must_use]
    pub fn writer(&self) -> StdioWriter<W> {
        self.writer.clone()
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Result<(), TransportError> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        info!(server = %info.name, version = %info.version, "stdio transport started");

        let (tx, mut rx) = mpsc::channel(self.settings.inbound_queue);
        let reader_task = tokio::spawn(read_frames(
            FrameReader::new(reader),
            tx,
            shutdown.clone(),
            self.settings.eof_retry,
        ));

        let mut processed: u64 = 0;
        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => break,
                frame = rx.recv() => frame,
            };
            let Some(frame) = frame else { break };

            match frame {
                Ok(raw) => {
                    processed += 1;
                    tokio::spawn(respond(
                        Arc::clone(&handler),
                        self.writer.clone(),
                        shutdown.clone(),
                        raw,
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Malformed frame on stdin");
                    deliver(&self.writer, &JsonRpcError::parse_error().to_bytes()).await;
                }
            }
        }

        reader_task.abort();
        info!(processed, "stdio transport stopped");
        Ok(())
    }
}

/// Runs one request on its own task so a slow handler never holds up the
/// frames behind it. A reply that completes after shutdown is discarded.
async fn respond<W>(
    handler: SharedHandler,
    writer: StdioWriter<W>,
    shutdown: CancellationToken,
    raw: Vec<u8>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let ctx = RequestContext::stdio(shutdown.child_token());
    let Some(reply) = dispatch(handler.as_ref(), ctx, raw).await.into_envelope() else {
        return;
    };
    if shutdown.is_cancelled() {
        debug!("Discarding reply completed after shutdown");
        return;
    }
    deliver(&writer, &reply).await;
}

async fn deliver<W>(writer: &StdioWriter<W>, message: &[u8])
where
    W: AsyncWrite + Unpin + Send,
{
    if let Err(e) = writer.write_message(message).await {
        error!(error = %e, "Failed to write to stdout");
    }
}

/// Reader task: decodes frames and forwards them until cancelled.
///
/// End of input and read failures are not fatal; the task pauses and tries
/// again since the peer may resume writing.
async fn read_frames<R>(
    mut frames: FrameReader<R>,
    tx: mpsc::Sender<Result<Vec<u8>, FrameError>>,
    shutdown: CancellationToken,
    retry: Duration,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return,
            frame = frames.read_frame() => frame,
        };

        let item = match frame {
            Ok(raw) => Ok(raw),
            Err(e) if e.is_framing() => Err(e),
            Err(FrameError::Eof) => {
                debug!("End of input; waiting for more");
                pause(&shutdown, retry).await;
                continue;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from stdin");
                pause(&shutdown, retry).await;
                continue;
            }
        };

        tokio::select! {
            () = shutdown.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn pause(shutdown: &CancellationToken, duration: Duration) {
    tokio::select! {
        () = shutdown.cancelled() => {}
        () = tokio::time::sleep(duration) => {}
    }
}
