use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use snafu::ensure;

use super::error::{QuotaExceededSnafu, StorageResult};
use super::ids::SessionKey;
use super::KeyValueBackend;

/// In-process backend. An optional byte quota makes oversized writes fail the
/// way a full browser store does.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<SessionKey, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionKey, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &SessionKey) -> StorageResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &SessionKey, value: &str) -> StorageResult<()> {
        let mut entries = self.entries();

        if let Some(limit) = self.quota_bytes {
            // Quota covers every stored byte once this write replaces the key's prior value.
            let others = entries
                .iter()
                .filter(|(existing, _)| *existing != key)
                .map(|(existing, stored)| existing.as_str().len() + stored.len())
                .sum::<usize>();
            let required = others + key.as_str().len() + value.len();
            ensure!(
                required <= limit,
                QuotaExceededSnafu {
                    stage: "memory-backend-set",
                    key: key.to_string(),
                    required,
                    limit,
                }
            );
        }

        entries.insert(key.clone(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &SessionKey) -> StorageResult<()> {
        self.entries().remove(key);
        Ok(())
    }
}
