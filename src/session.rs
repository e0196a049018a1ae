//! Opens the sync engine for one CLI invocation.
//!
//! The local store is the SQLite database from the config, or a directory
//! of JSON files when `local_store` is `files`. When a server
//! URL and a user are configured and the server answers its health check,
//! the session signs that user in against a `WsRemoteStore`; otherwise it
//! stays anonymous and every write goes to the local store only.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ecocatalyst_core::{
    check_server, Entity, EntityCache, FileLocalStore, IdentityGate, LocalStore, NoCompletion,
    OfflineRemoteStore, RemoteStore, SyncContext, SyncEngine, WsRemoteStore,
};

use crate::config::{Config, LocalStoreKind};
use crate::db::{init_db, SqliteLocalStore};

/// Upper bound for waiting on the first snapshot of a subscription.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Session {
    engine: SyncEngine,
    connected: bool,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self, Box<dyn Error>> {
        let local = open_local_store(config).await?;
        let identity = IdentityGate::new();

        let remote = connect_remote(config).await;
        let connected = remote.is_some();
        let remote: Arc<dyn RemoteStore> = match remote {
            Some(remote) => Arc::new(remote),
            None => Arc::new(OfflineRemoteStore),
        };

        if connected {
            if let Some(user_id) = &config.user_id.value {
                identity.sign_in(user_id.clone());
            }
        }

        let ctx = SyncContext::new(local, remote, identity).with_calendar(config.calendar()?);
        let engine = SyncEngine::new(ctx, Arc::new(NoCompletion));
        engine.start().await;

        Ok(Self { engine, connected })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Waits until `cache` holds the remote view. Returns immediately in
    /// local-only sessions.
    pub async fn settle<T: Entity>(&self, cache: &Arc<EntityCache<T>>) {
        self.confirm(cache, 0).await;
    }

    /// Waits for the first snapshot after `seen`, i.e. the one confirming a
    /// write made once `seen` snapshots had been applied.
    pub async fn confirm<T: Entity>(&self, cache: &Arc<EntityCache<T>>, seen: u64) {
        if !self.connected {
            return;
        }
        if tokio::time::timeout(SNAPSHOT_TIMEOUT, cache.await_snapshot_after(seen))
            .await
            .is_err()
        {
            tracing::warn!(kind = T::KIND, "Timed out waiting for remote data");
        }
    }

    /// Errors recorded by any domain during this session.
    pub fn errors(&self) -> Vec<(&'static str, String)> {
        self.engine.errors()
    }

    pub async fn close(self) {
        self.engine.shutdown().await;
    }
}

async fn open_local_store(config: &Config) -> Result<Arc<dyn LocalStore>, Box<dyn Error>> {
    let local: Arc<dyn LocalStore> = match config.local_store.value {
        LocalStoreKind::Sqlite => {
            let pool = init_db(&config.database_path.value).await?;
            Arc::new(SqliteLocalStore::new(pool))
        }
        LocalStoreKind::Files => {
            let dir = config.local_store_dir();
            tracing::debug!(dir = %dir.display(), "Using file local store");
            Arc::new(FileLocalStore::new(dir))
        }
    };
    Ok(local)
}

async fn connect_remote(config: &Config) -> Option<WsRemoteStore> {
    let server_url = config.server_url.value.as_deref()?;
    if config.user_id.value.is_none() {
        tracing::info!("No user configured, working locally");
        return None;
    }
    if !check_server(server_url).await {
        tracing::warn!(url = %server_url, "Sync server unreachable, working locally");
        return None;
    }
    match WsRemoteStore::connect(server_url).await {
        Ok(remote) => Some(remote),
        Err(e) => {
            tracing::warn!(url = %server_url, error = %e, "Failed to connect, working locally");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue};
    use chrono::NaiveDate;
    use ecocatalyst_core::models::{FootprintCategory, NewFootprintEntry};
    use tempfile::tempdir;

    fn local_config(dir: &std::path::Path) -> Config {
        Config {
            database_path: ConfigValue::new(dir.join("test.db"), ConfigSource::Default),
            local_store: ConfigValue::new(LocalStoreKind::Sqlite, ConfigSource::Default),
            server_url: ConfigValue::new(None, ConfigSource::Default),
            user_id: ConfigValue::new(Some("u1".to_string()), ConfigSource::Default),
            utc_offset_minutes: ConfigValue::new(0, ConfigSource::Default),
            config_file: None,
        }
    }

    #[tokio::test]
    async fn test_session_without_server_is_local() {
        let temp_dir = tempdir().unwrap();
        let config = local_config(temp_dir.path());

        let session = Session::open(&config).await.unwrap();
        assert!(!session.is_connected());
        assert!(!session.engine().context().identity.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_local_writes_survive_sessions() {
        let temp_dir = tempdir().unwrap();
        let config = local_config(temp_dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let session = Session::open(&config).await.unwrap();
        let id = session
            .engine()
            .footprint()
            .add_entry(NewFootprintEntry::new(date, FootprintCategory::Transportation, "bus", 1.5))
            .await
            .unwrap();
        session.close().await;

        let session = Session::open(&config).await.unwrap();
        let entries = session.engine().footprint().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].carbon_amount, 1.5);
        session.close().await;
    }

    #[tokio::test]
    async fn test_file_local_store_survives_sessions() {
        let temp_dir = tempdir().unwrap();
        let mut config = local_config(temp_dir.path());
        config.local_store = ConfigValue::new(LocalStoreKind::Files, ConfigSource::File);
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let session = Session::open(&config).await.unwrap();
        session
            .engine()
            .footprint()
            .add_entry(NewFootprintEntry::new(date, FootprintCategory::Food, "soup", 0.4))
            .await
            .unwrap();
        session.close().await;

        assert!(temp_dir
            .path()
            .join("local_store")
            .join("ecocatalyst_footprint_entries.json")
            .exists());
        assert!(!temp_dir.path().join("test.db").exists());

        let session = Session::open(&config).await.unwrap();
        assert_eq!(session.engine().footprint().entries().len(), 1);
        session.close().await;
    }
}
