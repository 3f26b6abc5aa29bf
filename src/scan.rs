//! Scan results consumed by the chat core, and the stores that resolve them.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{BabyShieldError, Result};

/// A single recall notice attached to a scanned product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hazard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub allergies: BTreeSet<String>,
}

/// Read-only product facts produced by the scan-lookup service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanContext {
    pub scan_id: Option<String>,
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub ingredients: Vec<String>,
    pub flags: BTreeSet<String>,
    pub profile: Option<UserProfile>,
    pub recalls_found: usize,
    pub recalls: Vec<RecallRecord>,
    pub min_age_months: Option<i32>,
    pub notes: Vec<String>,
    /// ISO country or region code the scan was made in
    pub jurisdiction: Option<String>,
}

impl ScanContext {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn allergies(&self) -> impl Iterator<Item = &String> {
        self.profile.iter().flat_map(|p| p.allergies.iter())
    }

    pub fn display_name(&self) -> &str {
        self.product_name.as_deref().unwrap_or("this product")
    }
}

/// Lookup of scan results keyed by an opaque scan id.
///
/// `Ok(None)` is a miss; callers turn it into a not-found error.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn get_scan(&self, scan_id: &str) -> Result<Option<ScanContext>>;
}

/// Process-local store, used in tests and single-node deployments
#[derive(Debug, Default)]
pub struct InMemoryScanStore {
    scans: RwLock<HashMap<String, ScanContext>>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, scan_id: impl Into<String>, scan: ScanContext) {
        self.scans.write().await.insert(scan_id.into(), scan);
    }

    pub async fn len(&self) -> usize {
        self.scans.read().await.len()
    }

    /// Build a store from a JSON object mapping scan id to scan.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| BabyShieldError::Config {
            message: format!("cannot read scan seed {}: {}", path.display(), e),
        })?;
        let mut scans: HashMap<String, ScanContext> = serde_json::from_str(&raw)?;
        for (id, scan) in scans.iter_mut() {
            scan.scan_id.get_or_insert_with(|| id.clone());
        }
        info!(count = scans.len(), path = %path.display(), "loaded scan seed");
        Ok(Self {
            scans: RwLock::new(scans),
        })
    }
}

#[async_trait]
impl ScanStore for InMemoryScanStore {
    async fn get_scan(&self, scan_id: &str) -> Result<Option<ScanContext>> {
        Ok(self.scans.read().await.get(scan_id).cloned())
    }
}

/// Bounded LRU cache in front of another store. Misses are not cached.
pub struct CachedScanStore<S> {
    inner: S,
    cache: Mutex<LruCache<String, ScanContext>>,
}

impl<S: ScanStore> CachedScanStore<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn invalidate(&self, scan_id: &str) {
        self.cache.lock().await.pop(scan_id);
    }
}

#[async_trait]
impl<S: ScanStore> ScanStore for CachedScanStore<S> {
    async fn get_scan(&self, scan_id: &str) -> Result<Option<ScanContext>> {
        if let Some(hit) = self.cache.lock().await.get(scan_id) {
            debug!(scan_id, "scan cache hit");
            return Ok(Some(hit.clone()));
        }

        let fetched = self.inner.get_scan(scan_id).await?;
        if let Some(scan) = &fetched {
            self.cache
                .lock()
                .await
                .put(scan_id.to_string(), scan.clone());
        }
        Ok(fetched)
    }
}
