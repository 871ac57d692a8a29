//! Content-addressed cache of past LLM judgments.
//!
//! Caching is what makes Tier 3 effectively deterministic: the same
//! prompt+context hashes to the same key, and a stored judgment short-circuits
//! the provider call. The on-disk snapshot is best-effort; write errors are
//! dropped because this is a cache, not a store of record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::Decision;

/// Default entry time-to-live: 7 days.
const DEFAULT_TTL_HOURS: i64 = 168;

/// A cached Tier-3 judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub stored_at: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Hash-keyed decision cache with a persistent JSON snapshot.
///
/// One mutex guards the map and the snapshot write together; lookups are
/// read-through under the same lock. Adequate because Tier 3 carries at most
/// ~1% of traffic.
pub struct DecisionCache {
    state: Mutex<CacheState>,
    snapshot_path: PathBuf,
    ttl: Duration,
}

impl DecisionCache {
    /// Open (or create) a cache rooted at `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self::with_ttl_hours(cache_dir, DEFAULT_TTL_HOURS)
    }

    /// Open with a custom TTL in hours.
    pub fn with_ttl_hours(cache_dir: impl AsRef<Path>, ttl_hours: i64) -> Self {
        let cache_dir = cache_dir.as_ref();
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!(error = %e, "could not create cache directory");
        }
        let snapshot_path = cache_dir.join("decisions.json");
        let entries = load_snapshot(&snapshot_path);

        Self {
            state: Mutex::new(CacheState {
                entries,
                hits: 0,
                misses: 0,
            }),
            snapshot_path,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Deterministic key from prompt and context.
    pub fn compute_key(prompt: &str, context: &HashMap<String, serde_json::Value>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(b"||");
        hasher.update(canonical_json(context).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Retrieve a live entry; expired entries are removed and persisted away.
    pub fn get(
        &self,
        prompt: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Option<CacheEntry> {
        let key = Self::compute_key(prompt, context);
        let mut state = self.state.lock().ok()?;

        match state.entries.get(&key) {
            Some(entry) if Utc::now() - entry.stored_at < self.ttl => {
                state.hits += 1;
                Some(entry.clone())
            }
            Some(_) => {
                state.entries.remove(&key);
                state.misses += 1;
                self.save_snapshot(&state.entries);
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a judgment, overwriting any prior entry.
    pub fn put(
        &self,
        prompt: &str,
        context: &HashMap<String, serde_json::Value>,
        decision: Decision,
        confidence: f64,
        reasoning: impl Into<String>,
    ) {
        let key = Self::compute_key(prompt, context);
        let entry = CacheEntry {
            decision,
            confidence,
            reasoning: reasoning.into(),
            stored_at: Utc::now(),
        };

        if let Ok(mut state) = self.state.lock() {
            state.entries.insert(key, entry);
            self.save_snapshot(&state.entries);
        }
    }

    /// Remove every expired entry; returns the count removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let now = Utc::now();
        let before = state.entries.len();
        let ttl = self.ttl;
        state.entries.retain(|_, e| now - e.stored_at < ttl);
        let removed = before - state.entries.len();
        if removed > 0 {
            self.save_snapshot(&state.entries);
        }
        removed
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let Ok(state) = self.state.lock() else {
            return CacheStats {
                size: 0,
                hits: 0,
                misses: 0,
                hit_rate: 0.0,
            };
        };
        let total = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                state.hits as f64 / total as f64
            },
        }
    }

    fn save_snapshot(&self, entries: &HashMap<String, CacheEntry>) {
        let json = match serde_json::to_string_pretty(entries) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "cache snapshot serialization failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.snapshot_path, json) {
            debug!(error = %e, "cache snapshot write failed, continuing in memory");
        }
    }
}

fn load_snapshot(path: &Path) -> HashMap<String, CacheEntry> {
    match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "corrupt cache snapshot, starting empty");
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}

/// Context serialized with sorted keys so hashing is order-independent.
fn canonical_json(context: &HashMap<String, serde_json::Value>) -> String {
    let ordered: BTreeMap<&String, &serde_json::Value> = context.iter().collect();
    serde_json::to_string(&ordered).unwrap_or_else(|_| "{}".to_string())
}
