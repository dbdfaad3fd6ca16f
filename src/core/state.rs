//! Durable per-stream key/value storage with TTL, capped lists, sets, and
//! fenced single-writer locks.
//!
//! The core ships [`MemoryStateStore`], a concurrent-map backed
//! implementation with a background TTL sweep, following the same shape as
//! the connection registry's management task: a shared map plus one
//! low-frequency maintenance loop that prunes expired entries. The trait is
//! the seam a networked implementation (Redis, etc.) would fill without
//! touching any caller.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// A fencing token returned by [`StateStore::lock`]; `unlock` only succeeds
/// if the caller presents the token it was issued.
pub type LockToken = String;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;

    /// Append to a list, dropping from the front once `cap` is exceeded.
    async fn list_append_capped(&self, key: &str, value: String, cap: usize) -> Result<()>;
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    async fn set_add(&self, key: &str, value: String) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<HashSet<String>>;

    /// Attempt to acquire a single-writer lock, returning a fencing token on
    /// success or `None` if already held.
    async fn lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<Option<LockToken>>;
    /// Release a lock previously acquired with the given token. A mismatched
    /// or already-expired token is a no-op, not an error.
    async fn unlock(&self, key: &str, token: &LockToken) -> Result<()>;

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| Error::StateStoreFailure(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        Self: Sized,
    {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::StateStoreFailure(e.to_string()))?;
        self.set_raw(key, bytes, ttl).await
    }
}

/// Typed accessors over the raw byte interface. Free functions rather than
/// trait methods so they remain callable through `Arc<dyn StateStore>` —
/// the generic `get`/`set` default methods on the trait itself require
/// `Self: Sized` to stay object-safe and so are only reachable on a
/// concrete store type.
pub async fn get_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.get_raw(key).await? {
        Some(bytes) => {
            Ok(Some(serde_json::from_slice(&bytes).map_err(|e| Error::StateStoreFailure(e.to_string()))?))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::StateStoreFailure(e.to_string()))?;
    store.set_raw(key, bytes, ttl).await
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<DateTime<Utc>>,
}

struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

struct LockEntry {
    token: LockToken,
    expires_at: DateTime<Utc>,
}

/// In-process implementation backed by [`DashMap`]s, with a background
/// sweep task pruning expired keys at a low, fixed frequency. This mirrors
/// the connection pool's own maintenance-tick pattern rather than
/// eagerly checking TTL on every access path.
pub struct MemoryStateStore {
    values: Arc<DashMap<String, Entry>>,
    lists: Arc<DashMap<String, ListEntry>>,
    sets: Arc<DashMap<String, SetEntry>>,
    locks: Arc<DashMap<String, LockEntry>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_interval(Duration::from_secs(30))
    }

    #[must_use]
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let values = Arc::new(DashMap::new());
        let lists = Arc::new(DashMap::new());
        let sets = Arc::new(DashMap::new());
        let locks = Arc::new(DashMap::new());

        let sweeper = {
            let values = values.clone();
            let lists = lists.clone();
            let sets = sets.clone();
            let locks = locks.clone();
            Some(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    sweep(&values, &lists, &sets, &locks);
                }
            }))
        };

        Self { values, lists, sets, locks, sweeper }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStateStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn sweep(
    values: &DashMap<String, Entry>,
    lists: &DashMap<String, ListEntry>,
    sets: &DashMap<String, SetEntry>,
    locks: &DashMap<String, LockEntry>,
) {
    let now = Utc::now();
    values.retain(|_, e| e.expires_at.map_or(true, |t| t > now));
    lists.retain(|_, e| e.expires_at.map_or(true, |t| t > now));
    sets.retain(|_, e| e.expires_at.map_or(true, |t| t > now));
    locks.retain(|_, e| e.expires_at > now);
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).and_then(|e| {
            if e.expires_at.map_or(true, |t| t > Utc::now()) {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.values.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.lists.remove(key);
        self.sets.remove(key);
        Ok(())
    }

    async fn list_append_capped(&self, key: &str, value: String, cap: usize) -> Result<()> {
        let mut entry = self.lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: None,
        });
        entry.items.push_back(value);
        while entry.items.len() > cap {
            entry.items.pop_front();
        }
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lists
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |t| t > Utc::now()))
            .map(|e| e.items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, value: String) -> Result<()> {
        let mut entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| SetEntry { members: HashSet::new(), expires_at: None });
        entry.members.insert(value);
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        Ok(self
            .sets
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |t| t > Utc::now()))
            .map(|e| e.members.clone())
            .unwrap_or_default())
    }

    async fn lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let now = Utc::now();
        let mut held = false;
        self.locks
            .entry(key.to_string())
            .and_modify(|e| {
                if e.expires_at > now {
                    held = true;
                }
            })
            .or_insert_with(|| LockEntry {
                token: format!("{owner}:{now}:{ttl:?}"),
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            });
        if held {
            return Ok(None);
        }
        // If we just inserted, or the previous holder expired, issue a fresh token.
        let token = format!("{owner}-{}", uuid::Uuid::new_v4());
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.locks.insert(key.to_string(), LockEntry { token: token.clone(), expires_at });
        Ok(Some(token))
    }

    async fn unlock(&self, key: &str, token: &LockToken) -> Result<()> {
        if let Some(entry) = self.locks.get(key) {
            if &entry.token != token {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        self.locks.remove_if(key, |_, e| &e.token == token);
        Ok(())
    }
}
