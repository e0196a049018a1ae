//! Wire frames between `WsRemoteStore` and `ecocatalyst-server`.
//!
//! Frames are CBOR-encoded and internally tagged by `type`. Every request
//! carries a `requestId` that the reply echoes; snapshot frames carry the
//! client-chosen `subscriptionId` instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::query::Query;
use crate::error::RemoteError;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
        path: String,
        query: Query,
    },
    Unsubscribe {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
    },
    Push {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: String,
        record: Value,
    },
    Write {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: String,
        record: Value,
    },
    ReadOnce {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<Query>,
    },
    Remove {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Request succeeded with nothing to return
    Ack {
        #[serde(rename = "requestId")]
        request_id: u64,
    },
    /// Key generated for a pushed record
    Pushed {
        #[serde(rename = "requestId")]
        request_id: u64,
        key: String,
    },
    /// Result of a read
    Value {
        #[serde(rename = "requestId")]
        request_id: u64,
        value: Option<Value>,
    },
    /// Request failed
    Error {
        #[serde(rename = "requestId")]
        request_id: u64,
        message: String,
    },
    /// New state of a subscribed path
    Snapshot {
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
        path: String,
        value: Option<Value>,
    },
    /// Subscription failed and will deliver nothing more
    SubscriptionError {
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
        message: String,
    },
}

impl ClientFrame {
    pub fn request_id(&self) -> u64 {
        match self {
            ClientFrame::Subscribe { request_id, .. }
            | ClientFrame::Unsubscribe { request_id, .. }
            | ClientFrame::Push { request_id, .. }
            | ClientFrame::Write { request_id, .. }
            | ClientFrame::ReadOnce { request_id, .. }
            | ClientFrame::Remove { request_id, .. } => *request_id,
        }
    }

    /// Encode frame as CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, RemoteError> {
        encode(self)
    }

    /// Decode frame from CBOR bytes.
    pub fn decode(data: &[u8]) -> Result<Self, RemoteError> {
        ciborium::from_reader(data).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

impl ServerFrame {
    /// Request this frame answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerFrame::Ack { request_id }
            | ServerFrame::Pushed { request_id, .. }
            | ServerFrame::Value { request_id, .. }
            | ServerFrame::Error { request_id, .. } => Some(*request_id),
            ServerFrame::Snapshot { .. } | ServerFrame::SubscriptionError { .. } => None,
        }
    }

    /// Error reply for a failed request.
    pub fn error(request_id: u64, err: &RemoteError) -> Self {
        ServerFrame::Error {
            request_id,
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RemoteError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, RemoteError> {
        ciborium::from_reader(data).map_err(|e| RemoteError::Protocol(e.to_string()))
    }
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, RemoteError> {
    let mut buf = Vec::new();
    ciborium::into_writer(frame, &mut buf).map_err(|e| RemoteError::Protocol(e.to_string()))?;
    Ok(buf)
}
