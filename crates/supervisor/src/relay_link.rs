//! Relay socket with automatic reconnect
//!
//! The supervisor holds one WebSocket to its room on the relay hub. On an
//! unexpected close, the link reconnects after a fixed delay forever -
//! unless the room was intentionally closed, which is the only thing that
//! stops it. The PTY is untouched by reconnects; only the socket is
//! re-established.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};

/// Fixed backoff between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Handle to the relay connection task
pub struct RelayLink {
    outbound_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl RelayLink {
    /// Open the link. The task keeps the socket alive in the background;
    /// inbound text frames are forwarded to `inbound_tx`.
    pub fn connect(url: String, inbound_tx: mpsc::Sender<String>) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::channel(256);

        let task = tokio::spawn(run_link(url, outbound_rx, inbound_tx, Arc::clone(&closed)));

        Self {
            outbound_tx,
            closed,
            task,
        }
    }

    /// Queue a payload for the hub
    pub async fn send(&self, payload: String) -> Result<()> {
        if self.is_closed() {
            return Err(SupervisorError::LinkClosed);
        }
        self.outbound_tx
            .send(payload)
            .await
            .map_err(|_| SupervisorError::LinkClosed)
    }

    /// Intentionally close the room: the reconnect loop stops for good.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.task.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn run_link(
    url: String,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
) {
    loop {
        if closed.load(Ordering::Acquire) {
            return;
        }

        match connect_async(&url).await {
            Ok((stream, _)) => {
                info!("Relay link connected");
                let (mut sink, mut source) = stream.split();

                loop {
                    tokio::select! {
                        outbound = outbound_rx.recv() => match outbound {
                            Some(payload) => {
                                if sink.send(Message::Text(payload)).await.is_err() {
                                    break;
                                }
                            }
                            // All senders gone; the supervisor dropped us
                            None => return,
                        },
                        inbound = source.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                if inbound_tx.send(text).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Relay socket closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Relay socket error: {}", e);
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                warn!("Relay connect failed: {}", e);
            }
        }

        if closed.load(Ordering::Acquire) {
            return;
        }
        // Transport drops are recovered here, silently; nobody upstream
        // hears about them
        info!("Reconnecting to relay in {:?}", RECONNECT_DELAY);
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_sticky() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let link = RelayLink::connect("ws://127.0.0.1:1/rooms/u/ws".to_string(), inbound_tx);
        assert!(!link.is_closed());

        link.close();
        assert!(link.is_closed());
        assert!(link.send("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_queues_while_disconnected() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        // Nothing listens on port 1; the link stays in its retry loop
        let link = RelayLink::connect("ws://127.0.0.1:1/rooms/u/ws".to_string(), inbound_tx);
        link.send("queued".to_string()).await.unwrap();
        link.close();
    }
}
