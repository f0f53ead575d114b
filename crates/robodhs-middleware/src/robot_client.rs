//! WebSocket client for the robot-control service.
//!
//! [`WsRobotClient`] speaks JSON text messages with the robot server:
//!
//! * **Outbound** – `{"type":"call","id":…,"operation":…,"target":…,"params":…}`
//!   issues an operation; `{"type":"cancel","id":…}` asks the server to
//!   abandon one; `{"type":"snapshot"}` asks it to re-send every entity as
//!   an `update`.
//!
//! * **Inbound (results)** – `{"type":"result","id":…,"stage":…,"message":…,"error":…}`.
//!   Only `stage == "end"` resolves the operation; other stages are progress
//!   reports and are only logged.
//!
//! * **Inbound (notifications)** – `{"type":"update","entity":…,"old":…,"value":…,"fault":…}`
//!   is broadcast to every [`RobotAdapter::subscribe`] stream as a
//!   [`StateEvent`].
//!
//! The connection is maintained by [`WsRobotClient::run`], which reconnects
//! with a bounded exponential [`Backoff`].  While the link is down `invoke`
//! fails with [`AdapterError::Unavailable`] and every operation that was
//! pending when the link dropped resolves as `robot_connection_lost`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use robodhs_types::{AdapterError, OperationId, OperationOutcome, RobotCall, StateEvent, reason};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{OperationHandle, OperationResolver, RobotAdapter};
use crate::backoff::Backoff;

const EVENT_CAPACITY: usize = 1024;

/// Messages sent to the robot server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    Call {
        id: OperationId,
        operation: &'a str,
        target: Option<&'a str>,
        params: &'a Value,
    },
    Cancel {
        id: OperationId,
    },
    Snapshot,
}

/// Messages received from the robot server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Result {
        id: OperationId,
        stage: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Update {
        entity: String,
        #[serde(default)]
        old: Option<Value>,
        value: Value,
        #[serde(default)]
        fault: bool,
    },
}

#[derive(Default)]
struct Link {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    pending: HashMap<OperationId, OperationResolver>,
}

struct Inner {
    url: String,
    link: Mutex<Link>,
    events: broadcast::Sender<StateEvent>,
    connected: AtomicBool,
}

/// Robot adapter backed by a WebSocket connection.  Clones share the link.
#[derive(Clone)]
pub struct WsRobotClient {
    inner: Arc<Inner>,
}

impl WsRobotClient {
    /// Create a client for `url` (e.g. `"ws://robot-host:9090"`).  Nothing
    /// connects until [`run`][Self::run] is polled.
    pub fn new(url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                link: Mutex::new(Link::default()),
                events,
                connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Operations still awaiting a final result from the robot server.
    pub fn pending_operations(&self) -> usize {
        self.link().pending.len()
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep the robot link alive until `shutdown` fires.
    pub async fn run(self, mut backoff: Backoff, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match connect_async(self.inner.url.as_str()).await {
                Ok((ws, _)) => {
                    backoff.reset();
                    info!(url = %self.inner.url, "connected to robot-control service");
                    self.serve(ws, &shutdown).await;
                    warn!(url = %self.inner.url, "robot-control link closed");
                }
                Err(e) => {
                    warn!(url = %self.inner.url, error = %e, attempt = backoff.attempts(), "robot-control connect failed");
                }
            }
            self.mark_disconnected();

            let delay = backoff.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.mark_disconnected();
    }

    async fn serve(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &CancellationToken,
    ) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.link().outgoing = Some(tx);
        self.inner.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                Some(msg) = rx.recv() => {
                    if let Err(e) = ws_tx.send(msg).await {
                        warn!(error = %e, "robot-control send failed");
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(error = %e, "robot-control receive failed");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Drop the outgoing channel and fail every pending operation.
    fn mark_disconnected(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let pending: Vec<_> = {
            let mut link = self.link();
            link.outgoing = None;
            link.pending.drain().collect()
        };
        if !pending.is_empty() {
            warn!(count = pending.len(), "failing operations pending on lost robot link");
        }
        for (_, resolver) in pending {
            resolver.resolve(OperationOutcome::Failed {
                reason: reason::ROBOT_CONNECTION_LOST.to_string(),
            });
        }
    }

    fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, raw = %text, "ignoring unparseable robot message");
                return;
            }
        };

        match message {
            ServerMessage::Result {
                id,
                stage,
                message,
                error,
            } => {
                if stage != "end" {
                    debug!(operation_id = %id, %stage, ?message, "robot operation progress");
                    return;
                }
                let Some(resolver) = self.link().pending.remove(&id) else {
                    debug!(operation_id = %id, "result for unknown or already resolved operation");
                    return;
                };
                let outcome = match error {
                    Some(reason) => OperationOutcome::Failed { reason },
                    None => OperationOutcome::Succeeded { message },
                };
                resolver.resolve(outcome);
            }
            ServerMessage::Update {
                entity,
                old,
                value,
                fault,
            } => {
                let event = StateEvent {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    entity,
                    old: old.map(value_to_string),
                    new: value_to_string(value),
                    fault,
                };
                // No subscribers is a normal condition.
                let _ = self.inner.events.send(event);
            }
        }
    }

    fn send(&self, message: &ClientMessage<'_>) -> Result<(), AdapterError> {
        let json = serde_json::to_string(message).map_err(|e| AdapterError::Encode(e.to_string()))?;
        let link = self.link();
        let tx = link
            .outgoing
            .as_ref()
            .ok_or_else(|| AdapterError::Unavailable("no robot-control link".to_string()))?;
        tx.send(Message::Text(json.into()))
            .map_err(|_| AdapterError::Unavailable("robot-control link closing".to_string()))
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl RobotAdapter for WsRobotClient {
    async fn invoke(&self, call: RobotCall) -> Result<OperationHandle, AdapterError> {
        let id = OperationId::new();
        let json = serde_json::to_string(&ClientMessage::Call {
            id,
            operation: &call.operation,
            target: call.target.as_deref(),
            params: &call.params,
        })
        .map_err(|e| AdapterError::Encode(e.to_string()))?;

        let (handle, resolver) = OperationHandle::channel(id);

        // Registering the resolver and sending happen under one lock so a
        // concurrent disconnect either sees the entry or refuses the call.
        let mut link = self.link();
        let Some(tx) = link.outgoing.clone() else {
            return Err(AdapterError::Unavailable("no robot-control link".to_string()));
        };
        link.pending.insert(id, resolver);
        if tx.send(Message::Text(json.into())).is_err() {
            link.pending.remove(&id);
            return Err(AdapterError::Unavailable("robot-control link closing".to_string()));
        }
        debug!(operation_id = %id, operation = %call.operation, "robot call sent");
        Ok(handle)
    }

    async fn subscribe(&self) -> BoxStream<'static, StateEvent> {
        let rx = self.inner.events.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "robot notification subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }

    async fn cancel(&self, id: OperationId) {
        let evicted = self.link().pending.remove(&id);
        if let Some(resolver) = evicted {
            resolver.resolve(OperationOutcome::Failed {
                reason: reason::CANCELLED.to_string(),
            });
        }
        if let Err(e) = self.send(&ClientMessage::Cancel { id }) {
            debug!(operation_id = %id, error = %e, "cancel not delivered");
        }
    }

    async fn request_snapshot(&self) {
        match self.send(&ClientMessage::Snapshot) {
            Ok(()) => debug!("robot state snapshot requested"),
            Err(e) => debug!(error = %e, "snapshot request not delivered"),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
