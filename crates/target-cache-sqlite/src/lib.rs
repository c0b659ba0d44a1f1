//! SQLite-backed target cache, so a session's targets survive between runs.

mod open;
mod schema;

use async_trait::async_trait;
use open::db_err;
use recon_core::cache::TargetCache;
use recon_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::debug;

#[derive(Clone)]
pub struct SqliteTargetCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTargetCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening target cache");
        Ok(SqliteTargetCache { conn: Arc::new(Mutex::new(open::open_or_create(path)?)) })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(SqliteTargetCache { conn: Arc::new(Mutex::new(open::open_in_memory()?)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| Error::Cache(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Cache(e.to_string()))?
    }
}

#[async_trait]
impl TargetCache for SqliteTargetCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<String>>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row("SELECT targets_json FROM target_cache WHERE cache_key=?", params![key], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            match json {
                None => Ok(None),
                Some(j) => serde_json::from_str(&j).map(Some).map_err(|e| Error::Cache(format!("corrupt entry for {}: {}", key, e))),
            }
        })
        .await
    }

    async fn set(&self, key: &str, targets: Vec<String>) -> Result<()> {
        let key = key.to_string();
        let json = serde_json::to_string(&targets).map_err(|e| Error::Cache(e.to_string()))?;
        let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO target_cache(cache_key,targets_json,updated_ms) VALUES (?,?,?)
                 ON CONFLICT(cache_key) DO UPDATE SET targets_json=excluded.targets_json, updated_ms=excluded.updated_ms",
                params![key, json, now_ms],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }
}
