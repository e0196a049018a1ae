//! Reference sync server.
//!
//! One in-memory tree is shared by every WebSocket connection and persisted
//! through [`TreeStorage`] after each mutation.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /ws`: WebSocket carrying CBOR-encoded client and server frames

pub mod connection;
pub mod storage;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use ecocatalyst_core::MemoryRemoteStore;

pub use storage::{ServerStorageError, TreeStorage};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryRemoteStore>,
    storage: Arc<TreeStorage>,
    save_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: MemoryRemoteStore, storage: TreeStorage) -> Self {
        Self {
            store: Arc::new(store),
            storage: Arc::new(storage),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Restores the tree saved in `storage`, or starts empty.
    pub fn load(storage: TreeStorage) -> Result<Self, ServerStorageError> {
        let store = match storage.load()? {
            Some(tree) => {
                tracing::info!("Loaded tree from {}", storage.tree_path().display());
                MemoryRemoteStore::from_tree(tree)
            }
            None => MemoryRemoteStore::new(),
        };
        Ok(Self::new(store, storage))
    }

    /// Writes the current tree to disk. Failures are logged; the in-memory
    /// tree stays authoritative.
    pub async fn persist(&self) {
        let _guard = self.save_lock.lock().await;
        let tree = self.store.export();
        let storage = self.storage.clone();
        let result = tokio::task::spawn_blocking(move || storage.save(&tree)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Failed to persist tree: {}", e),
            Err(e) => tracing::error!("Persist task failed: {}", e),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(connection::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use ecocatalyst_core::models::{FootprintCategory, NewFootprintEntry};
    use ecocatalyst_core::remote::Subscription;
    use ecocatalyst_core::{
        check_server, IdentityGate, MemoryLocalStore, NoCompletion, Query, RemoteStore, Snapshot,
        SyncContext, SyncEngine, WsRemoteStore,
    };

    const WAIT: Duration = Duration::from_secs(5);

    async fn spawn_server() -> (String, AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let state = AppState::load(TreeStorage::new(temp_dir.path())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}", addr), state, temp_dir)
    }

    async fn next_snapshot(subscription: &mut Subscription) -> Snapshot {
        timeout(WAIT, subscription.next())
            .await
            .expect("timed out waiting for snapshot")
            .expect("subscription closed")
            .expect("subscription failed")
    }

    #[tokio::test]
    async fn test_health_check() {
        let (url, _state, _dir) = spawn_server().await;
        assert!(check_server(&url).await);

        // Nothing listens on the discard port
        assert!(!check_server("http://127.0.0.1:9").await);
    }

    #[tokio::test]
    async fn test_push_subscribe_and_remove() {
        let (url, state, dir) = spawn_server().await;
        let remote = WsRemoteStore::connect(&url).await.unwrap();

        let mut subscription = remote
            .subscribe("footprints/u1", Query::new())
            .await
            .unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());

        let key = remote
            .push("footprints/u1", json!({"activityType": "bus", "carbonAmount": 1.5}))
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut subscription).await;
        let children = snapshot.children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[&key]["carbonAmount"], json!(1.5));

        let value = remote
            .read_once(&format!("footprints/u1/{}", key), None)
            .await
            .unwrap();
        assert_eq!(value.unwrap()["activityType"], json!("bus"));

        // Mutations are persisted as they happen
        let saved = TreeStorage::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(saved["footprints"]["u1"][&key]["carbonAmount"], json!(1.5));

        remote.remove("footprints/u1").await.unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());
        assert_eq!(remote.read_once("footprints/u1", None).await.unwrap(), None);

        remote.unsubscribe(subscription.id).await.unwrap();
        assert_eq!(state.store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_path_is_rejected() {
        let (url, _state, _dir) = spawn_server().await;
        let remote = WsRemoteStore::connect(&url).await.unwrap();

        let result = remote.write("bad.path", json!({"a": 1})).await;
        assert!(result.is_err());

        // The connection stays usable after a rejected request
        remote.write("ok", json!({"a": 1})).await.unwrap();
        assert_eq!(
            remote.read_once("ok", None).await.unwrap(),
            Some(json!({"a": 1}))
        );
    }

    #[tokio::test]
    async fn test_engine_syncs_through_server() {
        let (url, state, _dir) = spawn_server().await;
        let remote = Arc::new(WsRemoteStore::connect(&url).await.unwrap());

        let identity = IdentityGate::new();
        identity.sign_in("u1");
        let ctx = SyncContext::new(Arc::new(MemoryLocalStore::new()), remote, identity);
        let engine = SyncEngine::new(ctx, Arc::new(NoCompletion));
        engine.start().await;

        let cache = engine.footprint().cache();
        timeout(WAIT, cache.await_snapshot_after(0)).await.unwrap();
        assert!(engine.footprint().entries().is_empty());

        let seen = cache.snapshot_count();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let id = engine
            .footprint()
            .add_entry(NewFootprintEntry::new(
                date,
                FootprintCategory::Food,
                "lentil soup",
                0.8,
            ))
            .await
            .unwrap();
        timeout(WAIT, cache.await_snapshot_after(seen)).await.unwrap();

        let entries = engine.footprint().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].user_id, "u1");

        let tree = state.store.export();
        assert_eq!(tree["footprints"]["u1"][&id]["activityType"], json!("lentil soup"));

        engine.shutdown().await;
    }
}
