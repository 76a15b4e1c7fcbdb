//! Persistent WebSocket channel to the conversational backend.
//!
//! Reconnects with a fixed backoff while running. `send` fails fast when the
//! socket is not open so the orchestrator can abandon the turn instead of
//! silently queueing a stale one.

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{parse_server_text, OutboundPayload, ServerEvent};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

/// The seam the orchestrator sends through: fake in tests, WebSocket in
/// production.
pub trait Transport: Send {
    fn is_open(&self) -> bool;

    /// Serialize and send one payload. Fails with `TransportClosed` when the
    /// channel is not open; nothing is queued.
    fn send(&self, payload: &OutboundPayload) -> VoiceResult<()>;

    /// Stop the channel; no further messages are sent or received.
    fn close(&self);
}

type WriterSlot = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Auto-reconnecting WebSocket client. Messages are UTF-8 text frames.
pub struct TransportChannel {
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    writer: WriterSlot,
    inbound: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl TransportChannel {
    /// Spawn the connection task. Returns immediately; `is_open()` reflects
    /// the live socket state.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let running = Arc::new(AtomicBool::new(true));
        let open = Arc::new(AtomicBool::new(false));
        let writer: WriterSlot = Arc::new(Mutex::new(None));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_channel(
            url,
            running.clone(),
            open.clone(),
            writer.clone(),
            inbound_tx,
        ));

        Self {
            running,
            open,
            writer,
            inbound: Some(inbound_rx),
        }
    }

    /// Take the inbound event receiver. Yields `None` on the second call.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.inbound.take()
    }
}

impl Transport for TransportChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, payload: &OutboundPayload) -> VoiceResult<()> {
        if !self.is_open() {
            return Err(VoiceError::TransportClosed);
        }
        let text = serde_json::to_string(payload)
            .map_err(|e| VoiceError::Protocol(e.to_string()))?;
        let guard = self
            .writer
            .lock()
            .map_err(|_| VoiceError::Transport("writer slot poisoned".into()))?;
        match guard.as_ref() {
            Some(tx) => tx
                .send(text)
                .map_err(|e| VoiceError::ChannelSend(e.to_string())),
            None => Err(VoiceError::TransportClosed),
        }
    }

    fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.writer.lock() {
            *guard = None;
        }
        info!("transport: closed");
    }
}

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

async fn run_channel(
    url: String,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    writer: WriterSlot,
    inbound_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    while running.load(Ordering::SeqCst) {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!("transport: connected to {}", url);
                let (mut write, mut read) = ws.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                if let Ok(mut guard) = writer.lock() {
                    *guard = Some(out_tx);
                }
                open.store(true, Ordering::SeqCst);

                let writer_task = tokio::spawn(async move {
                    while let Some(text) = out_rx.recv().await {
                        if write.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                });

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => {
                            if let Some(event) = parse_server_text(text.as_str()) {
                                if inbound_tx.send(event).is_err() {
                                    // nobody is listening anymore
                                    running.store(false, Ordering::SeqCst);
                                    break;
                                }
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("transport: server closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!("transport: socket error: {}", e);
                            break;
                        }
                        // protocol is text-only; ping/pong are handled below us
                        _ => {}
                    }
                }

                open.store(false, Ordering::SeqCst);
                if let Ok(mut guard) = writer.lock() {
                    *guard = None;
                }
                writer_task.abort();
            }
            Err(e) => {
                warn!("transport: connect to {} failed: {}", url, e);
            }
        }

        if running.load(Ordering::SeqCst) {
            info!("transport: reconnecting in {:?}", RECONNECT_DELAY);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}
