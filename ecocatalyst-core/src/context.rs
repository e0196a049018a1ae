//! Shared collaborators handed to every cache and service.

use std::sync::Arc;

use crate::clock::{Calendar, Clock, SystemClock};
use crate::identity::IdentityGate;
use crate::local::LocalStore;
use crate::remote::RemoteStore;

/// Everything a domain needs from the outside world, constructed once per
/// process and passed down explicitly.
#[derive(Clone)]
pub struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub identity: IdentityGate,
    pub clock: Arc<dyn Clock>,
    pub calendar: Calendar,
}

impl SyncContext {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: IdentityGate,
    ) -> Self {
        Self {
            local,
            remote,
            identity,
            clock: Arc::new(SystemClock),
            calendar: Calendar::utc(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("identity", &self.identity.current())
            .field("calendar", &self.calendar)
            .finish_non_exhaustive()
    }
}
