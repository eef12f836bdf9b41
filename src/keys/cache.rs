// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TTL-bounded JWKS cache keyed by keyring name.
//!
//! ## Semantics
//!
//! - `get` treats an entry older than the TTL as absent and deletes it.
//! - `set` ignores an entry whose `updated_at_epoch_ms` is not newer than
//!   the stored one, so racing writers cannot move the timestamp backwards
//!   and a repeated write is a no-op.
//! - Backing storage is pluggable: one JSON file per keyring, or a bounded
//!   in-process LRU.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AuthError;
use crate::storage::{FileStore, StorageResult};

/// Default cache TTL (60 seconds).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Keyrings kept by the in-memory backend before the least recently used
/// one is evicted.
const DEFAULT_MEMORY_CAPACITY: usize = 64;

/// Published key set of one keyring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwksCacheEntry {
    /// Current key first, then the previous key if it is still published
    pub keys: Vec<Jwk>,
    /// Milliseconds since the Unix epoch of the write
    pub updated_at_epoch_ms: u64,
}

impl JwksCacheEntry {
    pub fn new(keys: Vec<Jwk>, updated_at_epoch_ms: u64) -> Self {
        Self {
            keys,
            updated_at_epoch_ms,
        }
    }

    /// The current key.
    pub fn first(&self) -> Option<&Jwk> {
        self.keys.first()
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
    }

    pub fn jwk_set(&self) -> JwkSet {
        JwkSet {
            keys: self.keys.clone(),
        }
    }
}

/// Storage backend for cache entries.
pub trait JwkStore: Send + Sync {
    fn load(&self, keyring: &str) -> StorageResult<Option<JwksCacheEntry>>;
    fn save(&self, keyring: &str, entry: &JwksCacheEntry) -> StorageResult<()>;
    /// Remove an entry. Removing a missing entry succeeds.
    fn remove(&self, keyring: &str) -> StorageResult<()>;
}

/// One `<keyring>.json` file per keyring under a root directory.
#[derive(Debug, Clone)]
pub struct FsJwkStore {
    files: FileStore,
}

impl FsJwkStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            files: FileStore::new(root),
        }
    }
}

impl JwkStore for FsJwkStore {
    fn load(&self, keyring: &str) -> StorageResult<Option<JwksCacheEntry>> {
        self.files.read_json(keyring)
    }

    fn save(&self, keyring: &str, entry: &JwksCacheEntry) -> StorageResult<()> {
        self.files.write_json(keyring, entry)
    }

    fn remove(&self, keyring: &str) -> StorageResult<()> {
        self.files.delete(keyring)
    }
}

/// In-process LRU of cache entries.
pub struct MemoryJwkStore {
    entries: Mutex<LruCache<String, JwksCacheEntry>>,
}

impl MemoryJwkStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, JwksCacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryJwkStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl JwkStore for MemoryJwkStore {
    fn load(&self, keyring: &str) -> StorageResult<Option<JwksCacheEntry>> {
        Ok(self.entries().get(keyring).cloned())
    }

    fn save(&self, keyring: &str, entry: &JwksCacheEntry) -> StorageResult<()> {
        self.entries().put(keyring.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, keyring: &str) -> StorageResult<()> {
        self.entries().pop(keyring);
        Ok(())
    }
}

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// TTL-bounded cache of published key sets.
pub struct JwkCache {
    store: Box<dyn JwkStore>,
    ttl: Duration,
    clock: Clock,
    /// Serializes read-compare-write sequences against the store
    write_lock: Mutex<()>,
}

impl JwkCache {
    pub fn new(store: impl JwkStore + 'static, ttl: Duration) -> Self {
        Self {
            store: Box::new(store),
            ttl,
            clock: Arc::new(system_clock),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(MemoryJwkStore::default(), ttl)
    }

    pub fn filesystem(root: impl AsRef<Path>, ttl: Duration) -> Self {
        Self::new(FsJwkStore::new(root), ttl)
    }

    /// Replace the clock (tests drive TTL expiry through this).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &JwksCacheEntry, now_ms: u64) -> bool {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(entry.updated_at_epoch_ms) > ttl_ms
    }

    /// Fetch the live entry for `keyring`. Expired entries are deleted and
    /// reported as absent.
    pub fn get(&self, keyring: &str) -> Result<Option<JwksCacheEntry>, AuthError> {
        let Some(entry) = self.store.load(keyring)? else {
            return Ok(None);
        };

        let now = self.now_ms();
        if !self.is_expired(&entry, now) {
            return Ok(Some(entry));
        }

        let _guard = self.lock();
        // A writer may have replaced the stale entry since we read it.
        match self.store.load(keyring)? {
            Some(current) if current.updated_at_epoch_ms == entry.updated_at_epoch_ms => {
                self.store.remove(keyring)?;
                debug!(
                    keyring,
                    age_ms = now.saturating_sub(entry.updated_at_epoch_ms),
                    "Evicted expired JWKS cache entry"
                );
                Ok(None)
            }
            Some(current) if !self.is_expired(&current, now) => Ok(Some(current)),
            _ => Ok(None),
        }
    }

    /// Store an entry. Returns `false` when the write was skipped because
    /// the stored entry is at least as recent.
    pub fn set(&self, keyring: &str, entry: JwksCacheEntry) -> Result<bool, AuthError> {
        if entry.keys.is_empty() {
            return Err(AuthError::Internal(format!(
                "refusing to publish an empty key set for keyring '{keyring}'"
            )));
        }

        let _guard = self.lock();
        if let Some(current) = self.store.load(keyring)? {
            if entry.updated_at_epoch_ms <= current.updated_at_epoch_ms {
                debug!(
                    keyring,
                    stored = current.updated_at_epoch_ms,
                    offered = entry.updated_at_epoch_ms,
                    "Skipping JWKS cache write that is not newer than the stored entry"
                );
                return Ok(false);
            }
        }

        self.store.save(keyring, &entry)?;
        Ok(true)
    }

    /// Remove the entry for `keyring`. Succeeds when nothing is stored.
    pub fn delete(&self, keyring: &str) -> Result<(), AuthError> {
        let _guard = self.lock();
        self.store.remove(keyring)?;
        Ok(())
    }

    /// Timestamp for the next write: now, but always past `previous`.
    pub fn next_timestamp(&self, previous: Option<&JwksCacheEntry>) -> u64 {
        let now = self.now_ms();
        match previous {
            Some(entry) if entry.updated_at_epoch_ms >= now => entry.updated_at_epoch_ms + 1,
            _ => now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::material::{SigningAlgorithm, SigningKey};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    const T0: u64 = 1_700_000_000_000;

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, Clock) {
        let now = Arc::new(AtomicU64::new(start));
        let handle = Arc::clone(&now);
        (now, Arc::new(move || handle.load(Ordering::SeqCst)))
    }

    fn entry_at(updated_at: u64) -> JwksCacheEntry {
        let key = SigningKey::generate(SigningAlgorithm::Es256).unwrap();
        JwksCacheEntry::new(vec![key.verification_jwk().clone()], updated_at)
    }

    #[test]
    fn entry_survives_until_ttl_then_expires() {
        let (now, clock) = manual_clock(T0);
        let cache = JwkCache::in_memory(Duration::from_secs(60)).with_clock(clock);
        cache.set("default", entry_at(T0)).unwrap();

        now.store(T0 + 59_000, Ordering::SeqCst);
        assert!(cache.get("default").unwrap().is_some());

        now.store(T0 + 61_000, Ordering::SeqCst);
        assert!(cache.get("default").unwrap().is_none());

        // Stale entry was deleted, not just hidden
        now.store(T0, Ordering::SeqCst);
        assert!(cache.get("default").unwrap().is_none());
    }

    #[test]
    fn same_timestamp_write_is_a_no_op() {
        let (_now, clock) = manual_clock(T0);
        let cache = JwkCache::in_memory(Duration::from_secs(60)).with_clock(clock);

        let first = entry_at(T0);
        let second = entry_at(T0);
        assert!(cache.set("default", first.clone()).unwrap());
        assert!(!cache.set("default", second).unwrap());

        assert_eq!(cache.get("default").unwrap(), Some(first));
    }

    #[test]
    fn older_write_does_not_move_timestamp_backwards() {
        let (_now, clock) = manual_clock(T0);
        let cache = JwkCache::in_memory(Duration::from_secs(60)).with_clock(clock);

        cache.set("default", entry_at(T0)).unwrap();
        assert!(!cache.set("default", entry_at(T0 - 1)).unwrap());
        assert!(cache.set("default", entry_at(T0 + 1)).unwrap());
        assert_eq!(
            cache.get("default").unwrap().unwrap().updated_at_epoch_ms,
            T0 + 1
        );
    }

    #[test]
    fn empty_key_set_is_rejected() {
        let cache = JwkCache::in_memory(DEFAULT_CACHE_TTL);
        let result = cache.set("default", JwksCacheEntry::new(Vec::new(), T0));
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[test]
    fn delete_missing_entry_succeeds() {
        let cache = JwkCache::in_memory(DEFAULT_CACHE_TTL);
        cache.delete("never-written").unwrap();
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let (_now, clock) = manual_clock(T0);
        let cache = JwkCache::in_memory(DEFAULT_CACHE_TTL).with_clock(clock);

        assert_eq!(cache.next_timestamp(None), T0);
        let same_ms = entry_at(T0);
        assert_eq!(cache.next_timestamp(Some(&same_ms)), T0 + 1);
        let older = entry_at(T0 - 10);
        assert_eq!(cache.next_timestamp(Some(&older)), T0);
    }

    #[test]
    fn filesystem_entries_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let (_now, clock) = manual_clock(T0);
        let entry = entry_at(T0);

        {
            let cache =
                JwkCache::filesystem(dir.path(), DEFAULT_CACHE_TTL).with_clock(Arc::clone(&clock));
            cache.set("signing", entry.clone()).unwrap();
        }

        assert!(dir.path().join("signing.json").exists());
        let reopened = JwkCache::filesystem(dir.path(), DEFAULT_CACHE_TTL).with_clock(clock);
        assert_eq!(reopened.get("signing").unwrap(), Some(entry));
    }

    #[test]
    fn filesystem_layout_uses_camel_case() {
        let dir = TempDir::new().unwrap();
        let cache = JwkCache::filesystem(dir.path(), DEFAULT_CACHE_TTL);
        cache.set("signing", entry_at(T0)).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("signing.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["updatedAtEpochMs"], T0);
        assert_eq!(value["keys"][0]["kty"], "EC");
    }

    #[test]
    fn memory_store_evicts_least_recently_used() {
        let store = MemoryJwkStore::new(1);
        store.save("a", &entry_at(T0)).unwrap();
        store.save("b", &entry_at(T0)).unwrap();
        assert!(store.load("a").unwrap().is_none());
        assert!(store.load("b").unwrap().is_some());
    }
}
