//! WebSocket client for the EcoCatalyst sync server.
//!
//! One connection carries every request and subscription. A writer task
//! drains outgoing frames; a reader task routes replies to the waiting
//! request by `requestId` and snapshots to the subscription by
//! `subscriptionId`. Subscription ids are chosen here, and the route is
//! registered before the request is sent, so no snapshot can arrive before
//! someone is listening for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::protocol::{ClientFrame, ServerFrame};
use super::{Query, RemoteStore, Snapshot, SnapshotEvent, Subscription, SubscriptionId};
use crate::error::RemoteError;

/// Timeout for opening the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerFrame>>>>;
type RouteMap = Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<SnapshotEvent>>>>;

/// Remote store backed by a WebSocket connection.
///
/// Requests have no timeout of their own: a stalled server leaves the call
/// pending until the connection drops.
pub struct WsRemoteStore {
    server_url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    routes: RouteMap,
    closed: Arc<AtomicBool>,
    next_request: AtomicU64,
    next_subscription: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WsRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRemoteStore")
            .field("server_url", &self.server_url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WsRemoteStore {
    /// Connects to `server_url` (`ws://`, `wss://`, `http://` or `https://`).
    pub async fn connect(server_url: &str) -> Result<Self, RemoteError> {
        let ws_url = build_ws_url(server_url);
        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(&ws_url))
            .await
            .map_err(|_| RemoteError::Connection(format!("Timed out connecting to {}", ws_url)))?
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        tracing::info!(url = %ws_url, "Connected to sync server");

        let (mut sink, mut stream) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let pending: PendingMap = Arc::default();
        let routes: RouteMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(error = %e, "Failed to send frame");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = {
            let pending = pending.clone();
            let routes = routes.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => match ServerFrame::decode(&data) {
                            Ok(frame) => dispatch(frame, &pending, &routes),
                            Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                fail_all(&pending, &routes);
                tracing::info!("Sync server connection closed");
            })
        };

        Ok(Self {
            server_url: server_url.to_string(),
            outgoing,
            pending,
            routes,
            closed,
            next_request: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(
        &self,
        build: impl FnOnce(u64) -> ClientFrame,
    ) -> Result<ServerFrame, RemoteError> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let bytes = build(request_id).encode()?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        // The reader may have shut down between the check above and the insert
        if self.is_closed() {
            lock(&self.pending).remove(&request_id);
            return Err(connection_closed());
        }

        if self.outgoing.send(Message::Binary(bytes.into())).is_err() {
            lock(&self.pending).remove(&request_id);
            return Err(connection_closed());
        }

        match rx.await.map_err(|_| connection_closed())? {
            ServerFrame::Error { message, .. } => Err(RemoteError::Rejected(message)),
            frame => Ok(frame),
        }
    }
}

impl Drop for WsRemoteStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn connection_closed() -> RemoteError {
    RemoteError::Connection("Connection closed".into())
}

fn unexpected(frame: ServerFrame) -> RemoteError {
    RemoteError::Protocol(format!("Unexpected reply: {:?}", frame))
}

fn dispatch(frame: ServerFrame, pending: &PendingMap, routes: &RouteMap) {
    match frame {
        ServerFrame::Snapshot {
            subscription_id,
            path,
            value,
        } => {
            let mut routes = lock(routes);
            if let Some(tx) = routes.get(&subscription_id) {
                if tx.send(Ok(Snapshot::new(path, value))).is_err() {
                    routes.remove(&subscription_id);
                }
            }
        }
        ServerFrame::SubscriptionError {
            subscription_id,
            message,
        } => {
            if let Some(tx) = lock(routes).remove(&subscription_id) {
                let _ = tx.send(Err(RemoteError::Rejected(message)));
            }
        }
        reply => {
            let Some(request_id) = reply.request_id() else {
                return;
            };
            match lock(pending).remove(&request_id) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => tracing::debug!(request_id, "Reply for unknown request"),
            }
        }
    }
}

/// Wakes every waiter once the connection is gone.
fn fail_all(pending: &PendingMap, routes: &RouteMap) {
    // Dropping the senders fails the pending receivers
    lock(pending).clear();
    for (_, tx) in lock(routes).drain() {
        let _ = tx.send(Err(RemoteError::SubscriptionClosed));
    }
}

#[async_trait]
impl RemoteStore for WsRemoteStore {
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, RemoteError> {
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.routes).insert(subscription_id, tx);

        let result = self
            .request(|request_id| ClientFrame::Subscribe {
                request_id,
                subscription_id,
                path: path.to_string(),
                query,
            })
            .await;

        match result {
            Ok(ServerFrame::Ack { .. }) => Ok(Subscription {
                id: subscription_id,
                path: path.to_string(),
                events: rx,
            }),
            Ok(other) => {
                lock(&self.routes).remove(&subscription_id);
                Err(unexpected(other))
            }
            Err(e) => {
                lock(&self.routes).remove(&subscription_id);
                Err(e)
            }
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RemoteError> {
        lock(&self.routes).remove(&id);
        if self.is_closed() {
            return Ok(());
        }
        match self
            .request(|request_id| ClientFrame::Unsubscribe {
                request_id,
                subscription_id: id,
            })
            .await?
        {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn push(&self, path: &str, record: Value) -> Result<String, RemoteError> {
        match self
            .request(|request_id| ClientFrame::Push {
                request_id,
                path: path.to_string(),
                record,
            })
            .await?
        {
            ServerFrame::Pushed { key, .. } => Ok(key),
            other => Err(unexpected(other)),
        }
    }

    async fn write(&self, path: &str, record: Value) -> Result<(), RemoteError> {
        match self
            .request(|request_id| ClientFrame::Write {
                request_id,
                path: path.to_string(),
                record,
            })
            .await?
        {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn read_once(
        &self,
        path: &str,
        query: Option<Query>,
    ) -> Result<Option<Value>, RemoteError> {
        match self
            .request(|request_id| ClientFrame::ReadOnce {
                request_id,
                path: path.to_string(),
                query,
            })
            .await?
        {
            ServerFrame::Value { value, .. } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        match self
            .request(|request_id| ClientFrame::Remove {
                request_id,
                path: path.to_string(),
            })
            .await?
        {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// Builds the WebSocket endpoint URL from a configured server URL.
pub fn build_ws_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else {
        base.to_string()
    };
    if base.ends_with("/ws") {
        base
    } else {
        format!("{}/ws", base)
    }
}

/// Builds an HTTP URL for `endpoint` from a configured server URL.
pub fn build_http_url(server_url: &str, endpoint: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = base.strip_suffix("/ws").unwrap_or(base);
    let base = if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", base, endpoint)
}

/// Returns true when the server answers its health endpoint.
pub async fn check_server(server_url: &str) -> bool {
    let url = build_http_url(server_url, "/health");
    let client = match reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build HTTP client");
            return false;
        }
    };
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Health check failed");
            false
        }
    }
}
