//! Detection signals: the transient per-tier evidence records.
//!
//! Each tier produces a [`SignalResult`]; the tier router and policy engine
//! consume it. Signals are evidence, never decisions.

pub mod matcher;
pub mod patterns;
pub mod semantic;

pub use matcher::{MatchRecord, PatternMatcher};
pub use patterns::{Pattern, PatternLibrary, PatternStats};
pub use semantic::{Embedder, FastembedEmbedder, SemanticDetector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::verdict::FailureClass;

/// Detection tier of increasing cost and semantic depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    /// Regex pattern matching
    One = 1,
    /// Embedding similarity
    Two = 2,
    /// LLM agent reasoning
    Three = 3,
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::One),
            2 => Ok(Tier::Two),
            3 => Ok(Tier::Three),
            other => Err(format!("invalid tier: {}", other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// How a signal was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Input too short to analyze
    Skipped,
    /// Oversized input treated as a denial-of-service probe
    DosProtection,
    /// Repetitive long input treated as a denial-of-service probe
    PatternAnalysis,
    /// An allow-pattern matched
    RegexAnti,
    /// A failure pattern matched
    RegexStrong,
    /// No pattern matched - gray zone
    RegexUncertain,
    /// Embedding similarity over quality classes
    Semantic,
    /// Embedding similarity over security classes
    SemanticSecurity,
    /// Pathological input skipped before encoding
    PathologicalSkipped,
    /// Embedding encode exceeded its deadline
    Timeout,
    /// LLM agent judgment
    LlmAgent,
    /// LLM agent judgment served from the decision cache
    LlmCached,
    /// LLM provider unavailable or unparseable
    LlmError,
    /// Tier 3 requested but no agent configured
    LlmUnavailable,
    /// Verdict synthesized after an unexpected internal error
    ErrorFallback,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Skipped => "skipped",
            Self::DosProtection => "dos_protection",
            Self::PatternAnalysis => "pattern_analysis",
            Self::RegexAnti => "regex_anti",
            Self::RegexStrong => "regex_strong",
            Self::RegexUncertain => "regex_uncertain",
            Self::Semantic => "semantic",
            Self::SemanticSecurity => "semantic_security",
            Self::PathologicalSkipped => "pathological_skipped",
            Self::Timeout => "timeout",
            Self::LlmAgent => "llm_agent",
            Self::LlmCached => "llm_cached",
            Self::LlmError => "llm_error",
            Self::LlmUnavailable => "llm_unavailable",
            Self::ErrorFallback => "error_fallback",
        };
        f.write_str(s)
    }
}

/// Transient per-tier detection output.
///
/// `should_allow` is three-valued: `Some(true)` is clearly benign,
/// `Some(false)` is a detected problem, `None` is the gray zone that
/// triggers escalation to the next tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    /// Failure class, when one was identified
    pub failure_class: Option<FailureClass>,
    /// Confidence in this signal (0.0 - 1.0)
    pub confidence: f64,
    /// How the signal was produced
    pub method: DetectionMethod,
    /// Three-valued allow judgment; `None` marks the gray zone
    pub should_allow: Option<bool>,
    /// Human-readable explanation
    pub explanation: String,
    /// Name of the pattern that fired, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_name: Option<String>,
}

impl SignalResult {
    /// A benign signal.
    pub fn allow(method: DetectionMethod, confidence: f64, explanation: impl Into<String>) -> Self {
        Self {
            failure_class: None,
            confidence,
            method,
            should_allow: Some(true),
            explanation: explanation.into(),
            signal_name: None,
        }
    }

    /// A detected failure.
    pub fn failure(
        failure_class: FailureClass,
        method: DetectionMethod,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            failure_class: Some(failure_class),
            confidence,
            method,
            should_allow: Some(false),
            explanation: explanation.into(),
            signal_name: None,
        }
    }

    /// The Tier-1 gray zone: neither clearly safe nor clearly unsafe.
    pub fn gray_zone() -> Self {
        Self {
            failure_class: None,
            confidence: 0.5,
            method: DetectionMethod::RegexUncertain,
            should_allow: None,
            explanation: "No strong patterns detected".to_string(),
            signal_name: None,
        }
    }

    /// Attach the name of the pattern or detector that fired.
    pub fn with_signal_name(mut self, name: impl Into<String>) -> Self {
        self.signal_name = Some(name.into());
        self
    }
}

/// Single-operation capability shared by the escalation tiers.
///
/// The Control Tower holds one implementation per tier and selects by tier
/// number; no inheritance, only this shared signature.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Analyze `text` and return a signal within `deadline`.
    async fn detect(
        &self,
        text: &str,
        context: &HashMap<String, serde_json::Value>,
        deadline: Duration,
    ) -> Result<SignalResult>;
}
