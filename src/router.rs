//! Tier routing: pick the next detector from the Tier-1 signal.
//!
//! The router is a pure function of the signal. It enforces nothing about
//! the steady-state 95/4/1 distribution; the monitor reports actuals, and
//! the distribution targets shape pattern authoring instead.

use serde::{Deserialize, Serialize};

use crate::signals::{DetectionMethod, SignalResult, Tier};

/// Default confidence at or above which a Tier-1 result is accepted outright.
const TIER1_STRONG_THRESHOLD: f64 = 0.8;
/// Default confidence at or below which the case escalates straight to Tier 3.
const TIER1_WEAK_THRESHOLD: f64 = 0.3;

/// Routing outcome for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDecision {
    /// Tier that will produce the final signal
    pub tier: Tier,
    /// Detection mechanism the tier uses
    pub method: DetectionMethod,
    /// Why this tier was chosen
    pub reason: String,
    /// Confidence of the signal that drove the decision
    pub confidence: f64,
}

/// Confidence-band router over Tier-1 signals.
#[derive(Debug, Clone)]
pub struct TierRouter {
    strong_threshold: f64,
    weak_threshold: f64,
}

impl TierRouter {
    pub fn new() -> Self {
        Self {
            strong_threshold: TIER1_STRONG_THRESHOLD,
            weak_threshold: TIER1_WEAK_THRESHOLD,
        }
    }

    /// Custom confidence bands (strong must exceed weak).
    pub fn with_thresholds(strong_threshold: f64, weak_threshold: f64) -> Self {
        Self {
            strong_threshold,
            weak_threshold,
        }
    }

    /// Choose the tier for a request given its Tier-1 signal.
    ///
    /// Accept Tier 1 when a regex verdict is confident; escalate the gray
    /// zone and mid-band confidences to Tier 2; everything else is an edge
    /// case for Tier 3.
    pub fn route(&self, signal: &SignalResult) -> TierDecision {
        let confident_regex = signal.confidence >= self.strong_threshold
            && matches!(
                signal.method,
                DetectionMethod::RegexStrong | DetectionMethod::RegexAnti
            );

        if confident_regex {
            let reason = if signal.method == DetectionMethod::RegexAnti {
                format!(
                    "High confidence anti-pattern match ({:.2})",
                    signal.confidence
                )
            } else {
                format!("High confidence Tier-1 match ({:.2})", signal.confidence)
            };
            return TierDecision {
                tier: Tier::One,
                method: signal.method,
                reason,
                confidence: signal.confidence,
            };
        }

        let gray_zone = signal.should_allow.is_none()
            || (signal.confidence > self.weak_threshold
                && signal.confidence < self.strong_threshold);
        if gray_zone {
            return TierDecision {
                tier: Tier::Two,
                method: DetectionMethod::Semantic,
                reason: format!(
                    "Gray zone ({:.2}) - escalating to semantic analysis",
                    signal.confidence
                ),
                confidence: signal.confidence,
            };
        }

        TierDecision {
            tier: Tier::Three,
            method: DetectionMethod::LlmAgent,
            reason: format!(
                "Edge case ({:.2}) - escalating to LLM agent",
                signal.confidence
            ),
            confidence: signal.confidence,
        }
    }
}

impl Default for TierRouter {
    fn default() -> Self {
        Self::new()
    }
}
