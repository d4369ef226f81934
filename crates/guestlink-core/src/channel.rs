use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::envelope::{HostMessage, RequestEnvelope, RequestId, ResponseEnvelope};
use crate::error::{BridgeError, ErrorCode};

/// Outbound half of the message channel to the host.
///
/// The bridge only needs to hand envelopes over in order; how they are
/// encoded and carried is up to the implementation.
pub trait Outbound: Send + Sync {
    fn post<'a>(
        &'a self,
        envelope: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + 'a>>;
}

impl Outbound for mpsc::Sender<RequestEnvelope> {
    fn post<'a>(
        &'a self,
        envelope: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + 'a>> {
        Box::pin(async move {
            self.send(envelope)
                .await
                .map_err(|_| BridgeError::ChannelClosed)
        })
    }
}

/// Newline-delimited JSON channel over any byte stream pair, e.g. a child
/// process's stdout/stdin.
///
/// A writer task encodes each outbound envelope as one line. A reader task
/// decodes each inbound line into a [`HostMessage`]; lines that do not parse
/// are logged and skipped. The inbound receiver ends when the reader hits
/// EOF or an I/O error.
pub struct JsonLinesChannel {
    pub outbound: Arc<dyn Outbound>,
    pub inbound: mpsc::Receiver<HostMessage>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl JsonLinesChannel {
    pub fn spawn<R, W>(reader: R, writer: W, buffer: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let buffer = buffer.max(1);
        let (out_tx, out_rx) = mpsc::channel::<RequestEnvelope>(buffer);
        let (in_tx, in_rx) = mpsc::channel::<HostMessage>(buffer);

        let writer_task = tokio::spawn(write_lines(writer, out_rx));
        let reader_task = tokio::spawn(read_lines(reader, in_tx));

        Self {
            outbound: Arc::new(out_tx),
            inbound: in_rx,
            writer_task,
            reader_task,
        }
    }

    /// Split into the parts the bridge consumes. The I/O tasks keep running
    /// in the background.
    pub fn into_parts(self) -> (Arc<dyn Outbound>, mpsc::Receiver<HostMessage>) {
        (self.outbound, self.inbound)
    }

    /// Stop both I/O tasks.
    pub fn abort(&self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

async fn write_lines<W>(mut writer: W, mut outbound: mpsc::Receiver<RequestEnvelope>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(id = %envelope.id, error = %e, "Failed to encode request");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = writer.write_all(&line).await {
            tracing::warn!(error = %e, "Channel write failed, closing outbound side");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(error = %e, "Channel flush failed, closing outbound side");
            break;
        }
        tracing::trace!(id = %envelope.id, method = %envelope.method, "Envelope written");
    }
}

/// Decode one inbound line.
///
/// A line that is not a valid message but still names a request id becomes a
/// failed response for that id, so the waiting caller sees an error. Lines
/// without a usable id are dropped.
fn decode_line(line: &str) -> Option<HostMessage> {
    let error = match serde_json::from_str::<HostMessage>(line) {
        Ok(message) => return Some(message),
        Err(e) => e,
    };

    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64));

    match id {
        Some(id) => {
            tracing::warn!(id, error = %error, "Unreadable response from host, failing request");
            Some(HostMessage::Response(ResponseEnvelope::failure(
                RequestId(id),
                ErrorCode::INTERNAL_ERROR,
                format!("unreadable host response: {error}"),
            )))
        }
        None => {
            tracing::warn!(error = %error, "Skipping malformed host message");
            None
        }
    }
}

async fn read_lines<R>(reader: R, inbound: mpsc::Sender<HostMessage>)
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
                let Some(message) = decode_line(&line) else {
                    continue;
                };
                if inbound.send(message).await.is_err() {
                    tracing::debug!("Inbound consumer gone, stopping reader");
                    break;
                }
            }
            Ok(None) => {
                tracing::info!("Host closed the channel");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Channel read failed");
                break;
            }
        }
    }
}
