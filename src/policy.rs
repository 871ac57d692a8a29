//! Declarative enforcement policy.
//!
//! The policy document maps each failure class to a severity, an action and
//! a reason, with per-severity confidence thresholds below which any
//! detection demotes to LOG. Loaded once, never mutated; its version string
//! is copied verbatim into every verdict.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::verdict::{Action, FailureClass, Severity};

/// The compiled-in default policy.
const BUILTIN_POLICY: &str = r#"
version: "1.0.0"

thresholds:
  critical: 0.8
  high: 0.7
  medium: 0.6
  low: 0.5

failure_policies:
  prompt_injection:
    severity: critical
    action: block
    reason: "Prompt injection attempt detected"
  toxicity:
    severity: critical
    action: block
    reason: "Toxic or hateful content detected"
  bias:
    severity: high
    action: warn
    reason: "Biased or stereotyping content detected"
  fabricated_fact:
    severity: high
    action: warn
    reason: "Factual fabrication detected"
  fabricated_concept:
    severity: medium
    action: warn
    reason: "Fabricated concept or terminology detected"
  missing_grounding:
    severity: medium
    action: warn
    reason: "Claims lack grounding or citations"
  domain_mismatch:
    severity: medium
    action: warn
    reason: "Response does not match the question domain"
  overconfidence:
    severity: low
    action: log
    reason: "Unqualified certainty in response"

messages:
  block: "Response blocked due to critical safety issue."
  warn: "Warning: Response may contain unreliable information."
  log: "Response logged for quality monitoring."
  allow: ""
"#;

/// Per-severity confidence thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical: 0.8,
            high: 0.7,
            medium: 0.6,
            low: 0.5,
        }
    }
}

impl Thresholds {
    /// Threshold for a severity; INFO detections always pass.
    pub fn for_severity(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => 0.0,
        }
    }
}

/// Policy entry for one failure class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassPolicy {
    pub severity: Severity,
    pub action: Action,
    pub reason: String,
    /// Overrides the per-severity threshold when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
}

/// The version-stamped policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub failure_policies: HashMap<String, ClassPolicy>,
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

/// The enforcement decision a policy renders for one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub severity: Severity,
    pub action: Action,
    pub reason: String,
}

/// Maps `(failure class, confidence)` to `(severity, action, reason)`.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    document: PolicyDocument,
}

impl PolicyEngine {
    /// The compiled-in default policy.
    pub fn builtin() -> Self {
        Self::from_yaml(BUILTIN_POLICY).expect("builtin policy document is valid")
    }

    /// Parse a policy document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: PolicyDocument =
            serde_yaml::from_str(yaml).map_err(|e| Error::Policy(format!("invalid YAML: {}", e)))?;
        if document.version.is_empty() {
            return Err(Error::Policy("policy document missing version".to_string()));
        }
        info!(version = %document.version, classes = document.failure_policies.len(), "policy loaded");
        Ok(Self { document })
    }

    /// Load a policy document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Policy(format!("cannot read policy file: {}", e)))?;
        Self::from_yaml(&yaml)
    }

    /// Version string copied into every verdict.
    pub fn version(&self) -> &str {
        &self.document.version
    }

    /// Render the enforcement decision for a detection.
    ///
    /// Unknown classes get `(LOW, LOG)`. Detections below their severity's
    /// confidence threshold demote to LOG (never strengthening a weaker
    /// configured action). A classless "problem but unclassified" signal
    /// maps to `(MEDIUM, WARN)`.
    pub fn decide(
        &self,
        failure_class: Option<FailureClass>,
        confidence: f64,
        should_allow: Option<bool>,
    ) -> PolicyDecision {
        if let Some(fc) = failure_class {
            let Some(policy) = self.document.failure_policies.get(fc.as_str()) else {
                return PolicyDecision {
                    severity: Severity::Low,
                    action: Action::Log,
                    reason: "default policy".to_string(),
                };
            };

            let threshold = policy
                .confidence_threshold
                .unwrap_or_else(|| self.document.thresholds.for_severity(policy.severity));

            let action = if confidence < threshold {
                policy.action.min(Action::Log)
            } else {
                policy.action
            };

            return PolicyDecision {
                severity: policy.severity,
                action,
                reason: policy.reason.clone(),
            };
        }

        if should_allow == Some(false) {
            return PolicyDecision {
                severity: Severity::Medium,
                action: Action::Warn,
                reason: "Unclassified issue detected".to_string(),
            };
        }

        PolicyDecision {
            severity: Severity::Info,
            action: Action::Allow,
            reason: "No issues detected".to_string(),
        }
    }

    /// User-facing message template for an action.
    pub fn message(&self, action: Action) -> Option<&str> {
        self.document.messages.get(&action.to_string()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_policy_parses() {
        let engine = PolicyEngine::builtin();
        assert_eq!(engine.version(), "1.0.0");
        assert_eq!(
            engine.message(Action::Block),
            Some("Response blocked due to critical safety issue.")
        );
    }

    #[test]
    fn test_injection_blocks_at_high_confidence() {
        let engine = PolicyEngine::builtin();
        let decision = engine.decide(Some(FailureClass::PromptInjection), 0.95, Some(false));
        assert_eq!(decision.severity, Severity::Critical);
        assert_eq!(decision.action, Action::Block);
    }

    #[test]
    fn test_low_confidence_demotes_to_log() {
        let engine = PolicyEngine::builtin();
        // Critical threshold is 0.8; keep severity, demote action.
        let decision = engine.decide(Some(FailureClass::PromptInjection), 0.6, Some(false));
        assert_eq!(decision.severity, Severity::Critical);
        assert_eq!(decision.action, Action::Log);
    }

    #[test]
    fn test_unknown_class_gets_default_row() {
        let yaml = r#"
version: "0.1.0"
failure_policies:
  bias: { severity: high, action: warn, reason: "bias" }
"#;
        let engine = PolicyEngine::from_yaml(yaml).unwrap();
        let decision = engine.decide(Some(FailureClass::Toxicity), 0.99, Some(false));
        assert_eq!(decision.severity, Severity::Low);
        assert_eq!(decision.action, Action::Log);
        assert_eq!(decision.reason, "default policy");
    }

    #[test]
    fn test_unclassified_problem_warns() {
        let engine = PolicyEngine::builtin();
        let decision = engine.decide(None, 0.7, Some(false));
        assert_eq!(decision.severity, Severity::Medium);
        assert_eq!(decision.action, Action::Warn);
    }

    #[test]
    fn test_clean_signal_allows() {
        let engine = PolicyEngine::builtin();
        let decision = engine.decide(None, 0.9, Some(true));
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.severity, Severity::Info);

        let gray = engine.decide(None, 0.5, None);
        assert_eq!(gray.action, Action::Allow);
    }

    #[test]
    fn test_per_class_threshold_override() {
        let yaml = r#"
version: "0.2.0"
failure_policies:
  overconfidence:
    severity: low
    action: warn
    reason: "overconfident"
    confidence_threshold: 0.9
"#;
        let engine = PolicyEngine::from_yaml(yaml).unwrap();

        let below = engine.decide(Some(FailureClass::Overconfidence), 0.8, Some(false));
        assert_eq!(below.action, Action::Log);

        let above = engine.decide(Some(FailureClass::Overconfidence), 0.95, Some(false));
        assert_eq!(above.action, Action::Warn);
    }

    #[test]
    fn test_demotion_never_strengthens_weak_actions() {
        let yaml = r#"
version: "0.3.0"
failure_policies:
  overconfidence:
    severity: low
    action: allow
    reason: "tolerated"
"#;
        let engine = PolicyEngine::from_yaml(yaml).unwrap();
        // Below threshold the configured ALLOW must not become LOG.
        let decision = engine.decide(Some(FailureClass::Overconfidence), 0.1, Some(false));
        assert_eq!(decision.action, Action::Allow);
    }

    #[test]
    fn test_monotone_in_confidence() {
        let engine = PolicyEngine::builtin();
        let mut previous = Action::Allow;
        for step in 0..=20 {
            let confidence = step as f64 / 20.0;
            let decision =
                engine.decide(Some(FailureClass::PromptInjection), confidence, Some(false));
            assert!(
                decision.action >= previous,
                "action weakened at confidence {}",
                confidence
            );
            previous = decision.action;
        }
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(PolicyEngine::from_yaml(": not yaml :").is_err());
        assert!(PolicyEngine::from_yaml("thresholds: {critical: 0.8}").is_err());
    }

    #[test]
    fn test_missing_version_rejected() {
        // A document without a version cannot stamp verdicts.
        let err = PolicyEngine::from_yaml("failure_policies: {}").unwrap_err();
        assert!(err.to_string().contains("Policy"));
    }
}
