//! Governance verdicts: the immutable decision record emitted per request.
//!
//! A verdict is a decision, not evidence. Signals record what was detected;
//! the verdict records what the gateway decided to do about it, stamped with
//! the policy version in force so audits can be joined retrospectively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::signals::{DetectionMethod, Tier};

/// Closed set of failure categories for undesirable model output.
///
/// Tags are persisted as stable snake_case strings; the set is append-only
/// and existing tags are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    PromptInjection,
    Bias,
    Toxicity,
    FabricatedConcept,
    FabricatedFact,
    MissingGrounding,
    Overconfidence,
    DomainMismatch,
}

impl FailureClass {
    /// All members, in canonical order.
    pub fn all() -> [FailureClass; 8] {
        [
            Self::PromptInjection,
            Self::Bias,
            Self::Toxicity,
            Self::FabricatedConcept,
            Self::FabricatedFact,
            Self::MissingGrounding,
            Self::Overconfidence,
            Self::DomainMismatch,
        ]
    }

    /// Stable string form used in policies and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::Bias => "bias",
            Self::Toxicity => "toxicity",
            Self::FabricatedConcept => "fabricated_concept",
            Self::FabricatedFact => "fabricated_fact",
            Self::MissingGrounding => "missing_grounding",
            Self::Overconfidence => "overconfidence",
            Self::DomainMismatch => "domain_mismatch",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact classification for detected failures.
///
/// Totally ordered: `Critical > High > Medium > Low > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Enforcement outcome for a verdict.
///
/// Ordered by strength: `Block > Warn > Log > Allow`. Policy mapping is
/// monotone in confidence with respect to this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// No action needed
    Allow = 0,
    /// Deliver the response, log for analysis
    Log = 1,
    /// Deliver the response with an annotation
    Warn = 2,
    /// Suppress response delivery
    Block = 3,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Log => write!(f, "log"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Record of a signal that fired during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredSignal {
    /// Name of the pattern or detector that fired
    pub signal_name: String,
    /// Confidence reported by the signal
    pub confidence: f64,
    /// Human-readable explanation
    pub explanation: String,
    /// When the signal fired
    pub timestamp: DateTime<Utc>,
}

impl FiredSignal {
    pub fn new(
        signal_name: impl Into<String>,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            signal_name: signal_name.into(),
            confidence,
            explanation: explanation.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The immutable governance decision for one evaluated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Unique identifier for the audit trail
    pub verdict_id: Uuid,
    /// Overall severity
    pub severity: Severity,
    /// Enforcement action
    pub action: Action,
    /// Primary failure class, if one was detected
    pub failure_class: Option<FailureClass>,
    /// Signals that fired
    pub fired_signals: Vec<FiredSignal>,
    /// Human-readable explanation of the decision
    pub reason: String,
    /// Overall confidence in the decision (0.0 - 1.0)
    pub confidence: f64,
    /// Version of the policy document in force
    pub policy_version: String,
    /// When the verdict was made
    pub timestamp: DateTime<Utc>,
    /// Which detection tier produced the final signal
    pub tier_used: Tier,
    /// How the final signal was produced
    pub method: DetectionMethod,
    /// End-to-end evaluation latency in milliseconds
    pub processing_time_ms: f64,
}

impl Verdict {
    /// Create an ALLOW verdict with no detected issues.
    pub fn allow(reason: impl Into<String>, policy_version: impl Into<String>) -> Self {
        Self {
            verdict_id: Uuid::new_v4(),
            severity: Severity::Info,
            action: Action::Allow,
            failure_class: None,
            fired_signals: Vec::new(),
            reason: reason.into(),
            confidence: 1.0,
            policy_version: policy_version.into(),
            timestamp: Utc::now(),
            tier_used: Tier::One,
            method: DetectionMethod::Skipped,
            processing_time_ms: 0.0,
        }
    }

    /// Check if this verdict suppresses response delivery.
    pub fn should_block(&self) -> bool {
        self.action == Action::Block
    }

    /// Number of signals that fired.
    pub fn signal_count(&self) -> usize {
        self.fired_signals.len()
    }

    /// Highest confidence among fired signals.
    pub fn highest_signal_confidence(&self) -> f64 {
        self.fired_signals
            .iter()
            .map(|s| s.confidence)
            .fold(0.0, f64::max)
    }

    /// Render a human-readable audit entry.
    pub fn to_audit_line(&self) -> String {
        let mut lines = vec![
            format!("[VERDICT {}]", self.verdict_id),
            format!("Timestamp: {}", self.timestamp.to_rfc3339()),
            format!("Severity: {}", self.severity),
            format!("Action: {}", self.action),
            format!("Tier: {}", u8::from(self.tier_used)),
            format!("Method: {}", self.method),
            format!("Reason: {}", self.reason),
            format!("Confidence: {:.2}", self.confidence),
        ];
        if !self.fired_signals.is_empty() {
            lines.push("Fired signals:".to_string());
            for signal in &self.fired_signals {
                lines.push(format!(
                    "  - {} (confidence={:.2}): {}",
                    signal.signal_name, signal.confidence, signal.explanation
                ));
            }
        }
        lines.join("\n")
    }
}

/// Aggregated verdict statistics for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub total_verdicts: u64,
    pub blocked_count: u64,
    pub warned_count: u64,
    pub logged_count: u64,
    pub allowed_count: u64,
    /// Counts keyed by severity string
    pub severity_counts: HashMap<String, u64>,
    /// Counts keyed by failure class string
    pub failure_class_counts: HashMap<String, u64>,
    /// Fire counts keyed by signal name
    pub most_fired_signals: HashMap<String, u64>,
}

impl VerdictSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a verdict into the summary.
    pub fn add(&mut self, verdict: &Verdict) {
        self.total_verdicts += 1;

        match verdict.action {
            Action::Block => self.blocked_count += 1,
            Action::Warn => self.warned_count += 1,
            Action::Log => self.logged_count += 1,
            Action::Allow => self.allowed_count += 1,
        }

        *self
            .severity_counts
            .entry(verdict.severity.to_string())
            .or_default() += 1;

        if let Some(fc) = verdict.failure_class {
            *self
                .failure_class_counts
                .entry(fc.as_str().to_string())
                .or_default() += 1;
        }

        for signal in &verdict.fired_signals {
            *self
                .most_fired_signals
                .entry(signal.signal_name.clone())
                .or_default() += 1;
        }
    }
}
