//! Rendezvous broker
//!
//! Loopback WebSocket server embedded in the host process. Each adapter
//! connection sends one `requestFeedback` frame; the broker hands the
//! prompt to the [`Interaction`] and writes the eventual answer back on the
//! same connection.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{HoldOnError, Result};
use crate::interaction::Interaction;
use crate::protocol::BridgeMessage;

/// How long a new connection has to complete the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Broker {
    listener: TcpListener,
    local_addr: SocketAddr,
    handshake_timeout: Duration,
}

impl Broker {
    /// Bind the listener. An occupied port is a [`HoldOnError::Bind`]; the
    /// caller must not retry on another port since adapters only know the
    /// configured one.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        if !addr.ip().is_loopback() {
            return Err(HoldOnError::InvalidConfig {
                message: format!("broker address {} is not loopback", addr),
            });
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HoldOnError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Feedback broker listening on ws://{}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections in the background.
    pub fn serve(self, interaction: Arc<Interaction>) -> BrokerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            self.listener,
            interaction.clone(),
            shutdown.clone(),
            self.handshake_timeout,
        ));
        BrokerHandle {
            local_addr: self.local_addr,
            shutdown,
            task,
            interaction,
        }
    }
}

pub struct BrokerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    interaction: Arc<Interaction>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn interaction(&self) -> &Arc<Interaction> {
        &self.interaction
    }

    /// Close the listener, abandon open connections and drop the pending
    /// request. Adapters still waiting fall back to their own timeout or
    /// see the connection close.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
        self.interaction.clear();
        tracing::info!("Feedback broker on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    interaction: Arc<Interaction>,
    shutdown: CancellationToken,
    handshake_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        interaction.clone(),
                        shutdown.child_token(),
                        handshake_timeout,
                    ));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    interaction: Arc<Interaction>,
    shutdown: CancellationToken,
    handshake_timeout: Duration,
) {
    let handshake = tokio::select! {
        _ = shutdown.cancelled() => return,
        handshake = tokio::time::timeout(handshake_timeout, accept_async(stream)) => handshake,
    };
    let ws_stream = match handshake {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            tracing::warn!(
                "WebSocket handshake with {} timed out after {:?}",
                peer,
                handshake_timeout
            );
            return;
        }
    };
    tracing::info!("Adapter connected from {}", peer);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<BridgeMessage>();

    // Task to forward answers to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_json() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode {:?}: {}", msg, e),
            }
        }
    });

    let mut in_flight: Vec<(Uuid, JoinHandle<()>)> = Vec::new();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(waiter) = handle_frame(text.as_str(), peer, &interaction, &tx) {
                    in_flight.push(waiter);
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::warn!("Ignoring binary frame from {}", peer);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!("Connection from {} errored: {}", peer, e);
                break;
            }
        }
    }

    // Nobody is left to read an answer for requests still on the panel.
    for (id, waiter) in in_flight {
        interaction.withdraw(id);
        waiter.abort();
    }
    send_task.abort();
    tracing::info!("Adapter {} disconnected", peer);
}

fn handle_frame(
    text: &str,
    peer: SocketAddr,
    interaction: &Arc<Interaction>,
    tx: &mpsc::UnboundedSender<BridgeMessage>,
) -> Option<(Uuid, JoinHandle<()>)> {
    match BridgeMessage::parse(text) {
        Ok(BridgeMessage::RequestFeedback { prompt }) => {
            tracing::info!("Feedback requested by {}", peer);
            let ticket = interaction.show_prompt(prompt);
            let id = ticket.id;
            let interaction = interaction.clone();
            let tx = tx.clone();
            let waiter = tokio::spawn(async move {
                let result = interaction.await_resolution(ticket).await;
                let _ = tx.send(BridgeMessage::FeedbackResult(result));
            });
            Some((id, waiter))
        }
        Ok(other) => {
            tracing::warn!("Ignoring unexpected {:?} from {}", other, peer);
            None
        }
        Err(e) => {
            tracing::warn!("Ignoring frame from {}: {}", peer, e);
            None
        }
    }
}
