// In-process document store for composed packages.
// Saves are idempotent by package id so callers can retry freely.

use crate::client::{PersistenceError, PersistenceGateway, SaveOutcome, Session};
use crate::types::{ComposedPackage, PackageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct StoreStats {
    pub saves: AtomicUsize,
    pub duplicate_saves: AtomicUsize,
    pub conflicts: AtomicUsize,
    pub loads: AtomicUsize,
    pub misses: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStatsReport {
    pub saves: usize,
    pub duplicate_saves: usize,
    pub conflicts: usize,
    pub loads: usize,
    pub misses: usize,
}

struct StoredPackage {
    package: ComposedPackage,
    owner: Option<String>,
    saved_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryPackageStore {
    packages: DashMap<PackageId, StoredPackage>,
    stats: StoreStats,
}

impl InMemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PackageId) -> Option<ComposedPackage> {
        self.packages.get(id).map(|stored| stored.package.clone())
    }

    // Packages saved under a given user, oldest first
    pub fn packages_for_owner(&self, user_id: &str) -> Vec<ComposedPackage> {
        let mut owned: Vec<(DateTime<Utc>, ComposedPackage)> = self
            .packages
            .iter()
            .filter(|stored| stored.owner.as_deref() == Some(user_id))
            .map(|stored| (stored.saved_at, stored.package.clone()))
            .collect();
        owned.sort_by_key(|(saved_at, _)| *saved_at);
        owned.into_iter().map(|(_, package)| package).collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn stats(&self) -> StoreStatsReport {
        StoreStatsReport {
            saves: self.stats.saves.load(Ordering::SeqCst),
            duplicate_saves: self.stats.duplicate_saves.load(Ordering::SeqCst),
            conflicts: self.stats.conflicts.load(Ordering::SeqCst),
            loads: self.stats.loads.load(Ordering::SeqCst),
            misses: self.stats.misses.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPackageStore {
    async fn save(
        &self,
        session: &Session,
        package: &ComposedPackage,
    ) -> Result<SaveOutcome, PersistenceError> {
        match self.packages.entry(package.id.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().package == *package {
                    self.stats.duplicate_saves.fetch_add(1, Ordering::SeqCst);
                    debug!(package_id = %package.id, "package already saved");
                    Ok(SaveOutcome::AlreadySaved)
                } else {
                    self.stats.conflicts.fetch_add(1, Ordering::SeqCst);
                    warn!(package_id = %package.id, "refusing to overwrite package with different content");
                    Err(PersistenceError::Conflict {
                        id: package.id.clone(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredPackage {
                    package: package.clone(),
                    owner: session.user_id.clone(),
                    saved_at: Utc::now(),
                });
                self.stats.saves.fetch_add(1, Ordering::SeqCst);
                debug!(package_id = %package.id, total_price = package.total_price, "package saved");
                Ok(SaveOutcome::Created)
            }
        }
    }

    async fn load(
        &self,
        _session: &Session,
        id: &PackageId,
    ) -> Result<Option<ComposedPackage>, PersistenceError> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        let found = self.get(id);
        if found.is_none() {
            self.stats.misses.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }
}
