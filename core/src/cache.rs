//! The target-resolution cache collaborator: remembers the last target list
//! per conversation so an empty extraction can reuse it.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait TargetCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<String>>>;
    async fn set(&self, key: &str, targets: Vec<String>) -> Result<()>;
}

/// Process-local cache, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTargetCache {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryTargetCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetCache for MemoryTargetCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<String>>> {
        let entries = self.entries.lock().map_err(|e| Error::Cache(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, targets: Vec<String>) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|e| Error::Cache(e.to_string()))?;
        entries.insert(key.to_string(), targets);
        Ok(())
    }
}

/// Pick the targets for this request.
///
/// A non-empty extraction is remembered under `key` and returned as is. An
/// empty one falls back to whatever was remembered last; with nothing cached
/// the result is [`Error::EmptyTargets`].
pub async fn resolve_targets(cache: &dyn TargetCache, key: &str, extracted: Vec<String>) -> Result<Vec<String>> {
    let extracted: Vec<String> = extracted
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !extracted.is_empty() {
        cache.set(key, extracted.clone()).await?;
        return Ok(extracted);
    }
    match cache.get(key).await? {
        Some(cached) if !cached.is_empty() => {
            debug!(key, count = cached.len(), "reusing cached targets");
            Ok(cached)
        }
        _ => Err(Error::EmptyTargets),
    }
}
