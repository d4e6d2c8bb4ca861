//! WebSocket client for the approvals server

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::messages::{ClientMessage, ServerMessage};

/// WebSocket client for the approvals server
pub struct ApprovalsClient {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<ServerMessage>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl ApprovalsClient {
    /// Connect to an approvals server
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Channel for outgoing messages
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);

        // Channel for incoming parsed messages
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(32);

        // Spawn task to handle WebSocket communication
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = out_rx.recv() => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(msg) => {
                                        if in_tx.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
        });

        tracing::info!("Connected successfully");

        Ok(Self {
            tx: out_tx,
            rx: in_rx,
            handle,
        })
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    /// Receive a message from the server
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Send a command and wait for its reply.
    ///
    /// Event frames arriving in between are skipped; server errors become
    /// `Err` carrying the error code.
    pub async fn request(&mut self, msg: ClientMessage) -> Result<ServerMessage> {
        self.send(msg).await?;

        while let Some(msg) = self.recv().await {
            match msg {
                ServerMessage::Event { .. } => continue,
                ServerMessage::Error { code, message } => {
                    return Err(anyhow!("{} ({})", message, code));
                }
                reply => return Ok(reply),
            }
        }

        Err(anyhow!("Connection closed"))
    }

    /// Subscribe to engine events, optionally only those addressed to one person
    pub async fn subscribe(&mut self, person_id: Option<String>) -> Result<()> {
        match self.request(ClientMessage::Subscribe { person_id }).await? {
            ServerMessage::Subscribed { .. } => Ok(()),
            other => Err(anyhow!("Unexpected reply: {:?}", other)),
        }
    }

    /// Listen for incoming events until the callback returns false
    pub async fn listen<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(ServerMessage) -> bool,
    {
        while let Some(msg) = self.recv().await {
            if !callback(msg) {
                break;
            }
        }
        Ok(())
    }
}
