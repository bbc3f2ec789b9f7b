use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::auth::TokenVerifier;
use crate::messages::{ClientFrame, ServerFrame};
use crate::registry::Registry;
use crate::store::{Store, StoreError};

pub struct Server {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    verifier: Arc<TokenVerifier>,
}

impl Server {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn Store>, verifier: Arc<TokenVerifier>) -> Self {
        Server {
            registry,
            store,
            verifier,
        }
    }

    // Authenticates the upgrade, registers the connection and spawns its
    // reader and writer tasks. The reader owns the inbound stream and feeds
    // frames to `dispatch` in transport order; the writer drains the
    // outbound queue. When the reader ends the record is unregistered,
    // which drops the queue sender and lets the writer wind down.
    pub async fn handle_connection(self: Arc<Self>, mut ws: WebSocket, token: Option<String>) {
        let user_id = match token.as_deref().map(|t| self.verifier.verify(t)) {
            Some(Ok(user_id)) => user_id,
            // the channel is not trusted yet: close without a payload
            _ => {
                warn!("websocket rejected: bad or missing credential");
                let _ = ws.close().await;
                return;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = self.registry.register(user_id.clone(), tx).await;
        info!(
            "user {} connected ({} live connections)",
            user_id,
            self.registry.connection_count().await
        );

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("outbound websocket write failed: {e}");
                    break;
                }
            }
        });

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        if let Ok(text) = msg.to_str() {
                            server.dispatch(&connection_id, text).await;
                        }
                    }
                    Err(e) => {
                        warn!("websocket error on {connection_id}: {e}");
                        break;
                    }
                }
            }

            server.registry.unregister(&connection_id).await;
            info!(
                "user {} disconnected ({} live connections)",
                user_id,
                server.registry.connection_count().await
            );
        });
    }

    // One inbound frame, processed to completion. A malformed frame is
    // dropped and logged; the connection stays open. Persistence happens
    // before fan-out, and a persistence failure suppresses the broadcast.
    pub async fn dispatch(&self, connection_id: &str, raw: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping malformed frame from {connection_id}: {e}");
                return;
            }
        };

        // dispatch may race with unregister; a missing record drops the event
        let Some(user_id) = self.registry.user_of(connection_id).await else {
            return;
        };

        match frame {
            ClientFrame::JoinRoom { room_id } => {
                if self.registry.join(connection_id, room_id).await {
                    debug!("user {user_id} joined room {room_id}");
                }
            }
            ClientFrame::LeaveRoom { room_id } => {
                if self.registry.leave(connection_id, room_id).await {
                    debug!("user {user_id} left room {room_id}");
                }
            }
            ClientFrame::Chat { room_id, message } => {
                match self.store.create_chat(room_id, &user_id, &message).await {
                    Ok(row) => {
                        self.broadcast(
                            room_id,
                            &ServerFrame::Chat {
                                room_id,
                                user_id,
                                message: row,
                            },
                        )
                        .await;
                    }
                    Err(e) => error!("chat for room {room_id} not persisted: {e}"),
                }
            }
            ClientFrame::Shapes { room_id, message } => {
                match self.store.create_shape(room_id, &user_id, &message).await {
                    Ok(row) => {
                        self.broadcast(
                            room_id,
                            &ServerFrame::Shapes {
                                room_id,
                                user_id,
                                message: row,
                            },
                        )
                        .await;
                    }
                    Err(e) => error!("shape for room {room_id} not persisted: {e}"),
                }
            }
            ClientFrame::Update { room_id, message } => {
                match self.store.update_shape(message.id, &message.shape).await {
                    Ok(row) => {
                        self.broadcast(
                            room_id,
                            &ServerFrame::Update {
                                room_id,
                                user_id,
                                message: row,
                            },
                        )
                        .await;
                    }
                    Err(StoreError::NotFound) => {
                        warn!("update for unknown shape {} dropped", message.id);
                    }
                    Err(e) => error!("shape update not persisted: {e}"),
                }
            }
        }
    }

    // Best-effort fan-out to the membership snapshot taken at call time.
    // The payload is serialized once; a recipient whose channel is gone is
    // skipped and the rest still get the frame. The registry lock is
    // released before any delivery.
    pub async fn broadcast(&self, room_id: i64, frame: &ServerFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to serialize broadcast for room {room_id}: {e}");
                return;
            }
        };

        for (connection_id, sender) in self.registry.members_of(room_id).await {
            if sender.send(Message::text(text.clone())).is_err() {
                debug!("skipping closed connection {connection_id} in room {room_id}");
            }
        }
    }
}
