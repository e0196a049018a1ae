//! Remote store.
//!
//! A keyed hierarchical collection store with long-lived subscriptions.
//! Every subscription delivers the full filtered view of its path whenever
//! any member changes, never a diff.
//!
//! Implementations:
//! - [`MemoryRemoteStore`]: in-process tree, also the engine of the server
//! - [`WsRemoteStore`]: WebSocket client for `ecocatalyst-server`
//! - [`OfflineRemoteStore`]: fails every call; used in local-only sessions

mod client;
mod memory;
mod protocol;
mod push_id;
mod query;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::RemoteError;

pub use client::{check_server, WsRemoteStore};
pub use memory::MemoryRemoteStore;
pub use protocol::{ClientFrame, ServerFrame};
pub use push_id::PushIdGenerator;
pub use query::{compare_values, OrderBy, Query};

pub type SubscriptionId = u64;

/// Full current state of a subscribed path. `None` means nothing is there.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn new(path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Keyed members when the snapshot is a collection.
    pub fn children(&self) -> Option<&Map<String, Value>> {
        match &self.value {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

pub type SnapshotEvent = Result<Snapshot, RemoteError>;

/// Handle to a live subscription. Dropping the receiver ends delivery; call
/// [`RemoteStore::unsubscribe`] to release the remote side as well.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub path: String,
    pub events: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Subscribes to the filtered view of `path`. The current view is
    /// delivered immediately, then again after every change.
    async fn subscribe(&self, path: &str, query: Query) -> Result<Subscription, RemoteError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RemoteError>;

    /// Stores `record` under a freshly generated child key and returns it.
    async fn push(&self, path: &str, record: Value) -> Result<String, RemoteError>;

    /// Replaces the node at `path`. Writing `null` removes it.
    async fn write(&self, path: &str, record: Value) -> Result<(), RemoteError>;

    async fn read_once(&self, path: &str, query: Option<Query>)
        -> Result<Option<Value>, RemoteError>;

    async fn remove(&self, path: &str) -> Result<(), RemoteError>;
}

/// Characters the backend does not accept inside a path segment.
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// Splits a slash-separated path into segments. The empty path is the root.
pub fn split_path(path: &str) -> Result<Vec<String>, RemoteError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() || segment.contains(FORBIDDEN_SEGMENT_CHARS) {
                Err(RemoteError::InvalidPath(path.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

pub fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// Last segment of a path.
pub fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Remote store for sessions without a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemoteStore;

#[async_trait]
impl RemoteStore for OfflineRemoteStore {
    async fn subscribe(&self, _path: &str, _query: Query) -> Result<Subscription, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn unsubscribe(&self, _id: SubscriptionId) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn push(&self, _path: &str, _record: Value) -> Result<String, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn write(&self, _path: &str, _record: Value) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn read_once(
        &self,
        _path: &str,
        _query: Option<Query>,
    ) -> Result<Option<Value>, RemoteError> {
        Err(RemoteError::Unavailable)
    }

    async fn remove(&self, _path: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable)
    }
}
