//! Fingerprinting and the response cache.
//!
//! The fingerprint is a SHA-256 over the normalized query, the canonical
//! serialization of the constraints, and any answered clarifications. It
//! keys both the cache and single-flight, so the two phases of the
//! clarification dialogue never collide on one key.
//!
//! Entries expire by TTL, checked lazily on access; an optional sweep
//! reclaims memory. Each entry also stores a digest of the exact request
//! it was computed from - a digest mismatch on lookup discards the entry
//! rather than serving a stale or colliding response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheSettings;
use crate::types::{Clarification, Constraints, OrchestrationRequest, OrchestrationResponse};

/// Lowercase, collapse whitespace, strip punctuation. Two queries that
/// differ only in casing or spacing normalize identically.
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split(|c: char| c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable cache / single-flight key for a request.
pub fn fingerprint(
    query: &str,
    constraints: &Constraints,
    clarifications: &[Clarification],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update([0u8]);
    // BTreeSet-backed fields make this serialization canonical.
    if let Ok(canonical) = serde_json::to_vec(constraints) {
        hasher.update(&canonical);
    }
    let mut sorted: Vec<&Clarification> = clarifications.iter().collect();
    sorted.sort_by(|a, b| a.question_id.cmp(&b.question_id));
    for clarification in sorted {
        hasher.update([0u8]);
        hasher.update(clarification.question_id.as_bytes());
        for value in &clarification.values {
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Digest revalidating a cache hit.
///
/// Computed over the same canonical material as the fingerprint but in a
/// separate hash domain: two distinct requests that happened to collide on
/// a fingerprint would still carry different digests, so the colliding
/// entry is discarded instead of served.
pub fn request_digest(request: &OrchestrationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"digest-v1\0");
    hasher.update(
        fingerprint(
            &request.query,
            &request.constraints,
            &request.clarifications,
        )
        .as_bytes(),
    );
    hasher.update(normalize_query(&request.query).as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache observability counters.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CachedEntry {
    digest: String,
    response: OrchestrationResponse,
    created_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// TTL response cache keyed by fingerprint.
pub struct ResponseCache {
    entries: DashMap<String, CachedEntry>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a live entry. Expired entries and digest mismatches are
    /// discarded and count as misses.
    pub fn get(&self, fingerprint: &str, digest: &str) -> Option<OrchestrationResponse> {
        let result = match self.entries.get(fingerprint) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.entries.remove(fingerprint);
                None
            }
            Some(entry) if entry.digest != digest => {
                debug!(fingerprint, "cache digest mismatch; discarding entry");
                drop(entry);
                self.entries.remove(fingerprint);
                None
            }
            Some(entry) => Some(entry.response.clone()),
            None => None,
        };
        match &result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Store a response. At capacity, the oldest entry is evicted.
    pub fn insert(&self, fingerprint: String, digest: String, response: OrchestrationResponse) {
        if self.entries.len() >= self.settings.max_entries
            && !self.entries.contains_key(&fingerprint)
        {
            self.evict_oldest();
        }
        self.entries.insert(
            fingerprint,
            CachedEntry {
                digest,
                response,
                created_at: Instant::now(),
                ttl: self.settings.ttl,
            },
        );
    }

    /// Drop every expired entry. Optional: correctness only needs the lazy
    /// check in [`get`](Self::get); this reclaims memory.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseMetadata;
    use flowgraph_core::FlowGraph;
    use uuid::Uuid;

    fn response() -> OrchestrationResponse {
        OrchestrationResponse {
            flow_id: Uuid::new_v4(),
            flow: FlowGraph::new(),
            explanation: "test".into(),
            confidence: 0.9,
            estimated_cost: 0.01,
            estimated_latency_ms: 100,
            metadata: ResponseMetadata::default(),
            alternatives: Vec::new(),
            needs_clarification: false,
            questions: Vec::new(),
        }
    }

    fn settings(ttl: Duration) -> CacheSettings {
        CacheSettings {
            ttl,
            max_entries: 4,
        }
    }

    #[test]
    fn test_normalize_query_collapses_case_and_spacing() {
        assert_eq!(
            normalize_query("  Create a   simple Q&A bot!  "),
            "create a simple q&a bot"
        );
    }

    #[test]
    fn test_fingerprint_stable_under_normalization() {
        let constraints = Constraints::default();
        let a = fingerprint("Analyze Documents", &constraints, &[]);
        let b = fingerprint("  analyze   documents ", &constraints, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_constraints_and_clarifications() {
        let base = fingerprint("analyze documents", &Constraints::default(), &[]);
        let constrained = fingerprint(
            "analyze documents",
            &Constraints::default().with_max_cost(0.01),
            &[],
        );
        assert_ne!(base, constrained);

        let clarified = fingerprint(
            "analyze documents",
            &Constraints::default(),
            &[Clarification {
                question_id: "data-source".into(),
                values: vec!["pdf".into()],
            }],
        );
        assert_ne!(base, clarified);
    }

    #[test]
    fn test_clarification_order_is_canonical() {
        let c1 = Clarification {
            question_id: "a".into(),
            values: vec!["1".into()],
        };
        let c2 = Clarification {
            question_id: "b".into(),
            values: vec!["2".into()],
        };
        let constraints = Constraints::default();
        assert_eq!(
            fingerprint("q", &constraints, &[c1.clone(), c2.clone()]),
            fingerprint("q", &constraints, &[c2, c1]),
        );
    }

    #[test]
    fn test_cache_hit_and_metrics() {
        let cache = ResponseCache::new(settings(Duration::from_secs(60)));
        cache.insert("fp".into(), "digest".into(), response());

        assert!(cache.get("fp", "digest").is_some());
        assert!(cache.get("missing", "digest").is_none());

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_ratio(), 0.5);
    }

    #[test]
    fn test_expired_entry_is_discarded() {
        let cache = ResponseCache::new(settings(Duration::from_millis(0)));
        cache.insert("fp".into(), "digest".into(), response());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("fp", "digest").is_none());
        assert_eq!(cache.metrics().entries, 0);
    }

    #[test]
    fn test_digest_mismatch_discards_entry() {
        let cache = ResponseCache::new(settings(Duration::from_secs(60)));
        cache.insert("fp".into(), "digest-a".into(), response());
        assert!(cache.get("fp", "digest-b").is_none());
        // Entry was discarded, not served stale.
        assert_eq!(cache.metrics().entries, 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ResponseCache::new(settings(Duration::from_secs(60)));
        for i in 0..5 {
            cache.insert(format!("fp-{}", i), "d".into(), response());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.metrics().entries, 4);
        assert_eq!(cache.metrics().evictions, 1);
        assert!(cache.get("fp-0", "d").is_none());
    }

    #[test]
    fn test_sweep_reclaims_expired_entries() {
        let cache = ResponseCache::new(settings(Duration::from_millis(0)));
        cache.insert("fp-1".into(), "d".into(), response());
        cache.insert("fp-2".into(), "d".into(), response());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.metrics().entries, 0);
    }
}
