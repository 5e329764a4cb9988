//! WebSocket event hub.
//!
//! Accepts observer connections on a plain TCP listener and fans every
//! broadcast envelope out to all of them. Best effort: a failed send
//! prunes that one client and never delays the others. Broadcasts are
//! also re-emitted on an internal channel for same-process listeners.
//!
//! ## Protocol
//!
//! ### Client → Server
//! ```json
//! {"type": "ping"}
//! {"type": "subscribe", "topics": ["skill_change"]}
//! {"type": "unsubscribe", "topics": ["skill_change"]}
//! ```
//!
//! ### Server → Client
//! Every message is an envelope `{"type", "data", "timestamp", "source"?}`.
//! `subscribe`/`unsubscribe` are acknowledged but advisory; every client
//! receives every broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::events::Envelope;

const INTERNAL_CHANNEL_CAPACITY: usize = 256;

/// Messages from observers
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
}

type ClientMap = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<WsMessage>>>>;

pub struct EventHub {
    clients: ClientMap,
    internal_tx: broadcast::Sender<Envelope>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (internal_tx, _) = broadcast::channel(INTERNAL_CHANNEL_CAPACITY);
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            internal_tx,
            listener_task: Mutex::new(None),
        }
    }

    /// Same-process event feed, independent of any WebSocket client
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.internal_tx.subscribe()
    }

    /// Bind the listener and start accepting observer connections
    pub async fn start(self: Arc<Self>, port: u16) -> Result<(), CoreError> {
        let mut task = self.listener_task.lock().await;
        if task.is_some() {
            debug!("Event hub already running");
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "Event hub listening");

        let hub = Arc::clone(&self);
        *task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let hub = Arc::clone(&hub);
                        tokio::spawn(async move {
                            if let Err(e) = hub.handle_connection(stream).await {
                                debug!(%addr, error = %e, "Observer connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
        }));

        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), CoreError> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| CoreError::Internal(format!("WebSocket handshake: {}", e)))?;

        let client_id = uuid::Uuid::new_v4().to_string();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();

        self.clients
            .write()
            .await
            .insert(client_id.clone(), out_tx.clone());
        info!(client_id = %client_id, "Observer connected");

        let welcome = Envelope::new("connected", json!({ "clientId": client_id }), None);
        if let Ok(text) = serde_json::to_string(&welcome) {
            let _ = out_tx.send(WsMessage::Text(text.into()));
        }

        let (mut sink, mut source) = ws_stream.split();

        // Outbound pump; owns the sink
        let forward = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(msg) = source.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(_) => break,
            };
            match msg {
                WsMessage::Text(text) => {
                    self.handle_client_message(&out_tx, text.as_ref());
                }
                WsMessage::Ping(payload) => {
                    let _ = out_tx.send(WsMessage::Pong(payload));
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        self.clients.write().await.remove(&client_id);
        forward.abort();
        info!(client_id = %client_id, "Observer disconnected");
        Ok(())
    }

    fn handle_client_message(&self, out_tx: &mpsc::UnboundedSender<WsMessage>, text: &str) {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
        let reply = match parsed {
            Ok(ClientMessage::Ping) => Envelope::new("pong", json!({}), None),
            Ok(ClientMessage::Subscribe { topics }) => {
                Envelope::new("subscribed", json!({ "topics": topics }), None)
            }
            Ok(ClientMessage::Unsubscribe { topics }) => {
                Envelope::new("unsubscribed", json!({ "topics": topics }), None)
            }
            Err(e) => Envelope::new("error", json!({ "message": e.to_string() }), None),
        };
        if let Ok(text) = serde_json::to_string(&reply) {
            let _ = out_tx.send(WsMessage::Text(text.into()));
        }
    }

    /// Fan an event out to every connected observer. With no clients
    /// this is a no-op apart from the internal re-emit.
    pub async fn broadcast(
        &self,
        event_type: &str,
        data: serde_json::Value,
        source: Option<String>,
    ) {
        self.broadcast_envelope(Envelope::new(event_type, data, source))
            .await;
    }

    /// Fan out an envelope built elsewhere, e.g. forwarded from an
    /// engine's notice channel
    pub async fn broadcast_envelope(&self, envelope: Envelope) {
        // Same-process listeners first; send fails only with zero receivers
        let _ = self.internal_tx.send(envelope.clone());

        let clients = self.clients.read().await;
        if clients.is_empty() {
            return;
        }

        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Failed to serialize broadcast envelope");
                return;
            }
        };

        let mut dead = Vec::new();
        for (client_id, tx) in clients.iter() {
            if tx.send(WsMessage::Text(text.clone().into())).is_err() {
                dead.push(client_id.clone());
            }
        }
        drop(clients);

        if !dead.is_empty() {
            let mut clients = self.clients.write().await;
            for client_id in dead {
                warn!(client_id = %client_id, "Pruning dead observer");
                clients.remove(&client_id);
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Stop accepting connections and drop every client
    pub async fn stop(&self) {
        if let Some(task) = self.listener_task.lock().await.take() {
            task.abort();
        }
        let mut clients = self.clients.write().await;
        for (client_id, tx) in clients.drain() {
            let _ = tx.send(WsMessage::Close(None));
            debug!(client_id = %client_id, "Closed observer connection");
        }
        info!("Event hub stopped");
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_client_broadcast_is_noop() {
        let hub = EventHub::new();
        hub.broadcast("index_complete", json!({"indexed": 3}), None)
            .await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_internal_subscribers_receive_broadcasts() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        hub.broadcast("skill_change", json!({"skillId": "pr-review"}), Some("watcher".into()))
            .await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "skill_change");
        assert_eq!(envelope.source.as_deref(), Some("watcher"));
    }

    #[tokio::test]
    async fn test_dead_client_pruned_on_broadcast() {
        let hub = EventHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        hub.clients.write().await.insert("c-1".to_string(), tx);

        hub.broadcast("heartbeat", json!({}), None).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[test]
    fn test_client_message_parsing() {
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));

        let sub: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topics":["a"]}"#).unwrap();
        assert!(matches!(sub, ClientMessage::Subscribe { topics } if topics == vec!["a"]));
    }
}
