//! Cached per-user snapshot: profile, balance and owned titles

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{titles, users, wallets, LedgerDb};
use crate::types::{LaurelError, Result};

/// Read model of a user as the request path sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: i64,
    pub email: Option<String>,
    pub experience: i64,
    pub level: i64,
    pub balance: i64,
    pub titles: Vec<i64>,
}

struct CachedSnapshot {
    snapshot: UserSnapshot,
    loaded_at: Instant,
}

impl CachedSnapshot {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() >= ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// TTL cache of [`UserSnapshot`]s, loaded from the ledger on miss
pub struct UserSnapshotCache {
    db: Arc<LedgerDb>,
    entries: DashMap<i64, CachedSnapshot>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// Bumped by every `evict`; a load that started before a bump is not cached
    evict_epoch: AtomicU64,
}

impl UserSnapshotCache {
    pub fn new(db: Arc<LedgerDb>, ttl: Duration) -> Self {
        Self {
            db,
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            evict_epoch: AtomicU64::new(0),
        }
    }

    /// Cached snapshot, loading it when absent or expired
    pub fn get(&self, user_id: i64) -> Result<UserSnapshot> {
        if let Some(entry) = self.entries.get(&user_id) {
            if !entry.is_expired(self.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.snapshot.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let epoch = self.evict_epoch.load(Ordering::SeqCst);
        let snapshot = self.load(user_id)?;
        self.store(user_id, &snapshot, epoch);
        Ok(snapshot)
    }

    /// Drop the cached snapshot; the next `get` reloads it
    pub fn evict(&self, user_id: i64) {
        self.evict_epoch.fetch_add(1, Ordering::SeqCst);
        if self.entries.remove(&user_id).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(user_id, "Evicted user snapshot");
        }
    }

    /// Cache a snapshot loaded at `epoch`, unless an eviction happened since
    ///
    /// The check runs under the entry's shard lock, which `evict` also takes
    /// after bumping the epoch, so an eviction either skips this insert or
    /// removes it.
    fn store(&self, user_id: i64, snapshot: &UserSnapshot, epoch: u64) {
        let entry = self.entries.entry(user_id);
        if self.evict_epoch.load(Ordering::SeqCst) != epoch {
            debug!(user_id, "Snapshot evicted while loading, not caching");
            return;
        }
        entry.insert(CachedSnapshot {
            snapshot: snapshot.clone(),
            loaded_at: Instant::now(),
        });
    }

    pub fn stats(&self) -> SnapshotCacheStats {
        SnapshotCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn load(&self, user_id: i64) -> Result<UserSnapshot> {
        self.db.with_conn(|conn| {
            let user = users::get_user(conn, user_id)?
                .ok_or_else(|| LaurelError::NotFound(format!("user {} not found", user_id)))?;
            let balance = wallets::get_balance(conn, user_id)?.ok_or_else(|| {
                LaurelError::NotFound(format!("wallet for user {} not found", user_id))
            })?;
            let titles = titles::list_user_titles(conn, user_id)?;

            Ok(UserSnapshot {
                user_id,
                email: user.email,
                experience: user.experience,
                level: user.level,
                balance,
                titles,
            })
        })
    }
}
