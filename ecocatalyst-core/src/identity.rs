//! Identity gate.
//!
//! The identity provider itself is external; it hands us a nullable user.
//! This module turns that into an [`Owner`] and notifies every domain when
//! it changes, which decides whether writes go to the remote store or stay
//! local.
//!
//! # Identity States
//!
//! 1. **Anonymous** - no user; caches operate in local-only mode
//! 2. **Connected** - a user id is present; caches subscribe to remote paths

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Owner id recorded on entities created without a user.
pub const ANONYMOUS: &str = "anonymous";

/// User handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Who owns the data written right now.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    #[default]
    Anonymous,
    User(String),
}

impl Owner {
    /// Identifier stamped into `userId` fields.
    pub fn id(&self) -> &str {
        match self {
            Owner::Anonymous => ANONYMOUS,
            Owner::User(id) => id,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Owner::Anonymous => None,
            Owner::User(id) => Some(id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Owner::Anonymous)
    }

    pub fn state(&self) -> IdentityState {
        match self {
            Owner::Anonymous => IdentityState::Anonymous,
            Owner::User(_) => IdentityState::Connected,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl From<Option<User>> for Owner {
    fn from(user: Option<User>) -> Self {
        match user {
            Some(user) if !user.id.is_empty() => Owner::User(user.id),
            _ => Owner::Anonymous,
        }
    }
}

/// Identity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// No user; writes stay in the local store
    Anonymous,
    /// User present; writes target the remote store
    Connected,
}

/// Change-notified holder of the current owner.
///
/// Clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct IdentityGate {
    tx: Arc<watch::Sender<Owner>>,
}

impl Default for IdentityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Owner::Anonymous);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Owner {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> IdentityState {
        self.tx.borrow().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == IdentityState::Connected
    }

    /// Replaces the current user. Subscribers are only notified when the
    /// owner actually changes.
    pub fn set_user(&self, user: Option<User>) -> bool {
        let next = Owner::from(user);
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            tracing::info!(owner = %next, "Identity changed");
        }
        changed
    }

    pub fn sign_in(&self, user_id: impl Into<String>) -> bool {
        self.set_user(Some(User::new(user_id)))
    }

    pub fn sign_out(&self) -> bool {
        self.set_user(None)
    }

    pub fn subscribe(&self) -> watch::Receiver<Owner> {
        self.tx.subscribe()
    }
}
