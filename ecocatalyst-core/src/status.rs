//! Per-domain error and loading flags.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Error message shown when a remote subscription fails.
pub const DB_CONNECTION_ERROR: &str =
    "Database connection error. Please check your internet connection.";

/// Error and loading state shared by every cache of one domain.
///
/// Operations never fail past the service boundary; instead they record a
/// user-facing message here. The message stays until `clear_error` is called.
#[derive(Debug)]
pub struct DomainStatus {
    domain: &'static str,
    error: Mutex<Option<String>>,
    loading: AtomicBool,
}

impl DomainStatus {
    pub fn new(domain: &'static str) -> Self {
        Self {
            domain,
            error: Mutex::new(None),
            loading: AtomicBool::new(false),
        }
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    /// Logs the underlying failure and records `message` for callers.
    pub fn fail(&self, message: &str, cause: &dyn Display) {
        tracing::error!(domain = self.domain, error = %cause, "{}", message);
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_error(&self) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }
}
