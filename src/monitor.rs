//! Tier distribution tracking and health reporting.
//!
//! Four monotonic counters record where requests resolve; the latency and
//! threat stats ride along for operational visibility. Counters are atomic
//! so the hot path never takes a lock for them.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::signals::Tier;

/// Requests required before health bands apply.
const WARMUP_REQUESTS: u64 = 50;

/// Expected steady-state bands, in percent.
const TIER1_BAND: (f64, f64) = (92.0, 98.0);
const TIER2_BAND: (f64, f64) = (2.0, 7.0);
const TIER3_BAND: (f64, f64) = (0.0, 3.0);

/// Latency and threat statistics for one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub count: u64,
    pub total_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub threat_count: u64,
}

impl Default for TierStats {
    fn default() -> Self {
        Self {
            count: 0,
            total_latency_ms: 0.0,
            min_latency_ms: f64::INFINITY,
            max_latency_ms: 0.0,
            threat_count: 0,
        }
    }
}

impl TierStats {
    fn record(&mut self, latency_ms: f64, is_threat: bool) {
        self.count += 1;
        self.total_latency_ms += latency_ms;
        self.min_latency_ms = self.min_latency_ms.min(latency_ms);
        self.max_latency_ms = self.max_latency_ms.max(latency_ms);
        if is_threat {
            self.threat_count += 1;
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_latency_ms / self.count as f64
        }
    }

    pub fn threat_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.threat_count as f64 / self.count as f64
        }
    }
}

/// Percentage distribution across tiers.
#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub total_requests: u64,
    pub tier1_pct: f64,
    pub tier2_pct: f64,
    pub tier3_pct: f64,
}

/// Tier distribution monitor.
///
/// Invariant: `tier1 + tier2 + tier3 == total` after every `record`.
pub struct TierMonitor {
    total: AtomicU64,
    tier1: AtomicU64,
    tier2: AtomicU64,
    tier3: AtomicU64,
    stats: Mutex<HashMap<Tier, TierStats>>,
    warmup: u64,
}

impl TierMonitor {
    pub fn new() -> Self {
        Self::with_warmup(WARMUP_REQUESTS)
    }

    /// Custom warm-up request count for the health check.
    pub fn with_warmup(warmup: u64) -> Self {
        Self {
            total: AtomicU64::new(0),
            tier1: AtomicU64::new(0),
            tier2: AtomicU64::new(0),
            tier3: AtomicU64::new(0),
            stats: Mutex::new(HashMap::new()),
            warmup,
        }
    }

    /// Record a resolved request.
    pub fn record(&self, tier: Tier, latency_ms: f64, is_threat: bool) {
        match tier {
            Tier::One => self.tier1.fetch_add(1, Ordering::Relaxed),
            Tier::Two => self.tier2.fetch_add(1, Ordering::Relaxed),
            Tier::Three => self.tier3.fetch_add(1, Ordering::Relaxed),
        };
        self.total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(tier).or_default().record(latency_ms, is_threat);
        }
    }

    /// Raw counter values `(total, tier1, tier2, tier3)`.
    pub fn counts(&self) -> (u64, u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.tier1.load(Ordering::Relaxed),
            self.tier2.load(Ordering::Relaxed),
            self.tier3.load(Ordering::Relaxed),
        )
    }

    /// Percentage distribution across tiers.
    pub fn distribution(&self) -> Distribution {
        let (total, t1, t2, t3) = self.counts();
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };
        Distribution {
            total_requests: total,
            tier1_pct: pct(t1),
            tier2_pct: pct(t2),
            tier3_pct: pct(t3),
        }
    }

    /// Health verdict over the current distribution.
    ///
    /// Healthy while warming up; afterwards each tier must sit inside its
    /// expected band, and the first tier outside its band is named.
    pub fn health(&self) -> (bool, String) {
        let dist = self.distribution();
        if dist.total_requests < self.warmup {
            return (
                true,
                format!(
                    "Healthy - insufficient data ({} of {} warm-up requests)",
                    dist.total_requests, self.warmup
                ),
            );
        }

        let checks = [
            ("Tier1", dist.tier1_pct, TIER1_BAND),
            ("Tier2", dist.tier2_pct, TIER2_BAND),
            ("Tier3", dist.tier3_pct, TIER3_BAND),
        ];
        for (name, pct, (low, high)) in checks {
            if pct < low || pct > high {
                return (
                    false,
                    format!(
                        "Degraded - {} at {:.1}% (expected {:.0}-{:.0}%)",
                        name, pct, low, high
                    ),
                );
            }
        }

        (
            true,
            format!(
                "Healthy distribution: {:.1}/{:.1}/{:.1}",
                dist.tier1_pct, dist.tier2_pct, dist.tier3_pct
            ),
        )
    }

    /// Per-tier latency and threat statistics.
    pub fn tier_stats(&self) -> HashMap<Tier, TierStats> {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Reset all counters and statistics.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.tier1.store(0, Ordering::Relaxed);
        self.tier2.store(0, Ordering::Relaxed);
        self.tier3.store(0, Ordering::Relaxed);
        if let Ok(mut stats) = self.stats.lock() {
            stats.clear();
        }
    }
}

impl Default for TierMonitor {
    fn default() -> Self {
        Self::new()
    }
}
