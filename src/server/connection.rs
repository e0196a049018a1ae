//! One WebSocket connection.
//!
//! Requests are answered in arrival order. Every subscription gets a
//! forwarding task that turns store snapshots into `Snapshot` frames tagged
//! with the client-chosen subscription id. All subscriptions of a
//! connection are released when it closes.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use ecocatalyst_core::remote::{ClientFrame, ServerFrame, SubscriptionId};
use ecocatalyst_core::{RemoteError, RemoteStore};

use super::AppState;

/// A live subscription: the store-side id and the task forwarding it.
struct Forwarder {
    store_id: SubscriptionId,
    task: JoinHandle<()>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    tracing::info!(%connection_id, "Client connected");

    let (mut sink, mut stream) = socket.split();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: HashMap<u64, Forwarder> = HashMap::new();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => match ClientFrame::decode(&data) {
                Ok(frame) => {
                    let reply = handle_frame(frame, &state, &outgoing, &mut forwarders).await;
                    if outgoing.send(reply).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(%connection_id, "Dropping undecodable frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%connection_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    for (_, forwarder) in forwarders.drain() {
        release(&state, forwarder).await;
    }
    drop(outgoing);
    let _ = writer.await;
    tracing::info!(%connection_id, "Client disconnected");
}

async fn handle_frame(
    frame: ClientFrame,
    state: &AppState,
    outgoing: &mpsc::UnboundedSender<ServerFrame>,
    forwarders: &mut HashMap<u64, Forwarder>,
) -> ServerFrame {
    let request_id = frame.request_id();
    let store = &state.store;

    match frame {
        ClientFrame::Subscribe {
            subscription_id,
            path,
            query,
            ..
        } => {
            if forwarders.contains_key(&subscription_id) {
                return ServerFrame::error(
                    request_id,
                    &RemoteError::Rejected(format!(
                        "Subscription {} already exists",
                        subscription_id
                    )),
                );
            }
            match store.subscribe(&path, query).await {
                Ok(mut subscription) => {
                    let store_id = subscription.id;
                    let outgoing = outgoing.clone();
                    let task = tokio::spawn(async move {
                        while let Some(event) = subscription.next().await {
                            let (frame, last) = match event {
                                Ok(snapshot) => (
                                    ServerFrame::Snapshot {
                                        subscription_id,
                                        path: snapshot.path,
                                        value: snapshot.value,
                                    },
                                    false,
                                ),
                                Err(e) => (
                                    ServerFrame::SubscriptionError {
                                        subscription_id,
                                        message: e.to_string(),
                                    },
                                    true,
                                ),
                            };
                            if outgoing.send(frame).is_err() || last {
                                break;
                            }
                        }
                    });
                    forwarders.insert(subscription_id, Forwarder { store_id, task });
                    ServerFrame::Ack { request_id }
                }
                Err(e) => ServerFrame::error(request_id, &e),
            }
        }
        ClientFrame::Unsubscribe {
            subscription_id, ..
        } => {
            if let Some(forwarder) = forwarders.remove(&subscription_id) {
                release(state, forwarder).await;
            }
            ServerFrame::Ack { request_id }
        }
        ClientFrame::Push { path, record, .. } => match store.push(&path, record).await {
            Ok(key) => {
                state.persist().await;
                ServerFrame::Pushed { request_id, key }
            }
            Err(e) => ServerFrame::error(request_id, &e),
        },
        ClientFrame::Write { path, record, .. } => match store.write(&path, record).await {
            Ok(()) => {
                state.persist().await;
                ServerFrame::Ack { request_id }
            }
            Err(e) => ServerFrame::error(request_id, &e),
        },
        ClientFrame::ReadOnce { path, query, .. } => match store.read_once(&path, query).await {
            Ok(value) => ServerFrame::Value { request_id, value },
            Err(e) => ServerFrame::error(request_id, &e),
        },
        ClientFrame::Remove { path, .. } => match store.remove(&path).await {
            Ok(()) => {
                state.persist().await;
                ServerFrame::Ack { request_id }
            }
            Err(e) => ServerFrame::error(request_id, &e),
        },
    }
}

async fn release(state: &AppState, forwarder: Forwarder) {
    forwarder.task.abort();
    if let Err(e) = state.store.unsubscribe(forwarder.store_id).await {
        tracing::debug!("Unsubscribe failed: {}", e);
    }
}
