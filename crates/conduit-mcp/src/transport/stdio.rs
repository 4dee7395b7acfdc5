//! Stdio transport: newline-delimited JSON over stdin/stdout.
//!
//! A single session with the fixed id `"stdio"`. Diagnostics belong on
//! stderr (the tracing subscriber is pointed there in stdio mode), so stdout
//! stays protocol-clean. End of input closes the session.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{CloseReason, Transport, TransportEvent};
use crate::error::{TransportError, TransportResult};

/// The one session id a stdio transport ever reports.
pub const STDIO_SESSION_ID: &str = "stdio";

/// Line-framed standard-streams transport.
#[derive(Default)]
pub struct StdioTransport {
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Create an idle transport; nothing happens until [`Transport::start`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        *self.outbound.lock().await = Some(out_tx);

        // Writer task: the single consumer of stdout, so concurrent handler
        // completions cannot interleave on the wire.
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = out_rx.recv().await {
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdout.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdout.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut reader = BufReader::new(stdin);
            let mut line = String::new();

            if events_tx
                .send(TransportEvent::SessionOpen { session_id: STDIO_SESSION_ID.to_owned() })
                .await
                .is_err()
            {
                return;
            }
            tracing::info!("Stdio transport ready, waiting for requests");

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::info!("Stdin closed, ending session");
                        let _ = events_tx
                            .send(TransportEvent::SessionClose {
                                session_id: STDIO_SESSION_ID.to_owned(),
                                reason: CloseReason::EndOfInput,
                            })
                            .await;
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let event = TransportEvent::Incoming {
                            session_id: STDIO_SESSION_ID.to_owned(),
                            payload: trimmed.to_owned(),
                            auth: None,
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Stdin read failed");
                        let _ = events_tx
                            .send(TransportEvent::SessionClose {
                                session_id: STDIO_SESSION_ID.to_owned(),
                                reason: CloseReason::Disconnected,
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        *self.reader_task.lock().await = Some(reader);
        *self.writer_task.lock().await = Some(writer);
        Ok(events_rx)
    }

    async fn send(&self, session_id: &str, payload: String) -> TransportResult<()> {
        if session_id != STDIO_SESSION_ID {
            return Err(TransportError::SessionNotFound(session_id.to_owned()));
        }
        let sender = self.outbound.lock().await.clone();
        let Some(sender) = sender else {
            return Err(TransportError::Closed);
        };
        sender.send(payload).await.map_err(|_| TransportError::Closed)
    }

    async fn broadcast(&self, payload: String) -> TransportResult<()> {
        self.send(STDIO_SESSION_ID, payload).await
    }

    async fn close(&self) -> TransportResult<()> {
        // Dropping the sender lets the writer drain and exit; the reader is
        // parked on stdin and has to be aborted.
        self.outbound.lock().await.take();
        if let Some(writer) = self.writer_task.lock().await.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        Ok(())
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish()
    }
}
