//! Capability catalog.
//!
//! The catalog indexes the building blocks a plan can use. It is rebuilt
//! from an external component registry and published as an immutable
//! snapshot behind an `Arc`: readers clone the Arc and never observe a
//! half-built catalog.
//!
//! Change notifications are debounced - a burst of registry updates causes
//! one rebuild after a quiet window, not a rebuild storm. Transient scan
//! failures are retried with exponential backoff and jitter while readers
//! keep being served the last-good snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CatalogSettings;
use crate::{OrchestratorError, Result};

/// One indexed building block. Immutable once indexed; a catalog rebuild
/// replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Capability {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            description: String::new(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// An immutable catalog snapshot.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    capabilities: HashMap<String, Capability>,
    by_category: HashMap<String, Vec<String>>,
    /// Monotonic snapshot version; bumped on every rebuild.
    pub version: u64,
    pub rebuilt_at: DateTime<Utc>,
}

impl CapabilityCatalog {
    /// The empty catalog (version 0), used before the first rebuild.
    pub fn empty() -> Self {
        Self {
            capabilities: HashMap::new(),
            by_category: HashMap::new(),
            version: 0,
            rebuilt_at: Utc::now(),
        }
    }

    /// Build a snapshot from scanned capabilities.
    pub fn from_capabilities(capabilities: Vec<Capability>, version: u64) -> Self {
        let mut map = HashMap::with_capacity(capabilities.len());
        let mut by_category: HashMap<String, Vec<String>> = HashMap::new();
        for capability in capabilities {
            by_category
                .entry(capability.category.clone())
                .or_default()
                .push(capability.id.clone());
            map.insert(capability.id.clone(), capability);
        }
        for ids in by_category.values_mut() {
            ids.sort_unstable();
        }
        Self {
            capabilities: map,
            by_category,
            version,
            rebuilt_at: Utc::now(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.capabilities.get(id)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Capabilities in a category, ordered by id.
    pub fn by_category(&self, category: &str) -> Vec<&Capability> {
        self.by_category
            .get(category)
            .map(|ids| ids.iter().filter_map(|id| self.capabilities.get(id)).collect())
            .unwrap_or_default()
    }

    /// Token-overlap search over name, description, and tags. Results are
    /// ranked by score, then id for a stable order.
    pub fn search(&self, query: &str) -> Vec<&Capability> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(f64, &Capability)> = self
            .capabilities
            .values()
            .filter_map(|capability| {
                let score = overlap_score(&query_tokens, capability);
                (score > 0.0).then_some((score, capability))
            })
            .collect();
        hits.sort_by(|(sa, ca), (sb, cb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.id.cmp(&cb.id))
        });
        hits.into_iter().map(|(_, c)| c).collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

fn overlap_score(query_tokens: &[String], capability: &Capability) -> f64 {
    let mut haystack = tokenize(&capability.name);
    haystack.extend(tokenize(&capability.description));
    for tag in &capability.tags {
        haystack.extend(tokenize(tag));
    }
    let matched = query_tokens
        .iter()
        .filter(|t| haystack.iter().any(|h| h == *t))
        .count();
    matched as f64 / query_tokens.len() as f64
}

/// External collaborator: the source of capability metadata.
#[async_trait]
pub trait ComponentRegistry: Send + Sync {
    /// Scan the registry. An empty result is a valid (empty) catalog; an
    /// error is transient and retried by the background rebuilder.
    async fn scan(&self) -> anyhow::Result<Vec<Capability>>;
}

/// In-memory registry used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryComponentRegistry {
    components: RwLock<Vec<Capability>>,
    scans: AtomicU64,
}

impl InMemoryComponentRegistry {
    pub fn new(components: Vec<Capability>) -> Self {
        Self {
            components: RwLock::new(components),
            scans: AtomicU64::new(0),
        }
    }

    pub fn replace(&self, components: Vec<Capability>) {
        *self.components.write() = components;
    }

    /// Number of scans served; lets tests observe debouncing.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ComponentRegistry for InMemoryComponentRegistry {
    async fn scan(&self) -> anyhow::Result<Vec<Capability>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        Ok(self.components.read().clone())
    }
}

/// Owns the published snapshot and the rebuild machinery.
pub struct CatalogService {
    registry: Arc<dyn ComponentRegistry>,
    current: RwLock<Arc<CapabilityCatalog>>,
    version: AtomicU64,
    dirty: Notify,
    settings: CatalogSettings,
}

impl CatalogService {
    pub fn new(registry: Arc<dyn ComponentRegistry>, settings: CatalogSettings) -> Self {
        Self {
            registry,
            current: RwLock::new(Arc::new(CapabilityCatalog::empty())),
            version: AtomicU64::new(0),
            dirty: Notify::new(),
            settings,
        }
    }

    /// The current snapshot. Cheap: clones an Arc.
    pub fn snapshot(&self) -> Arc<CapabilityCatalog> {
        self.current.read().clone()
    }

    /// Scan the registry and publish a new snapshot. Never fails on an
    /// empty source; a scan error leaves the previous snapshot in place.
    pub async fn rebuild(&self) -> Result<()> {
        let capabilities = self
            .registry
            .scan()
            .await
            .map_err(|e| OrchestratorError::Catalog(e.to_string()))?;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Arc::new(CapabilityCatalog::from_capabilities(capabilities, version));
        let size = catalog.len();
        *self.current.write() = catalog;
        info!(version, size, "capability catalog rebuilt");
        Ok(())
    }

    /// Rebuild with the configured retry backoff. Gives up (keeping the
    /// last-good snapshot) after `rebuild_attempts` failures.
    pub async fn rebuild_with_backoff(&self) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..self.settings.rebuild_attempts {
            match self.rebuild().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        ?delay,
                        "catalog rebuild failed: {}; retrying",
                        err
                    );
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| OrchestratorError::Catalog("rebuild attempts exhausted".into())))
    }

    /// Record that the external registry changed. The background rebuilder
    /// coalesces bursts into a single rebuild.
    pub fn notify_changed(&self) {
        self.dirty.notify_one();
    }

    /// Spawn the debounced background rebuilder.
    ///
    /// Waits for a change notification, then for a quiet window of
    /// `settings.debounce`; notifications arriving inside the window extend
    /// it. Runs until the returned handle is aborted.
    pub fn spawn_rebuilder(self: Arc<Self>) -> JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            loop {
                service.dirty.notified().await;
                // Trailing-edge debounce: restart the window on every
                // further notification.
                loop {
                    let window = tokio::time::timeout(
                        service.settings.debounce,
                        service.dirty.notified(),
                    );
                    if window.await.is_err() {
                        break;
                    }
                    debug!("catalog change burst; extending debounce window");
                }
                if let Err(err) = service.rebuild_with_backoff().await {
                    warn!("catalog rebuild gave up; serving last-good snapshot: {}", err);
                }
            }
        })
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let base = self.settings.backoff_initial
            * self.settings.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.settings.backoff_max);
        let final_delay = if self.settings.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay)
    }
}
