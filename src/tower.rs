//! Control Tower: the per-request driver of the detection pipeline.
//!
//! Validates input, runs Tier 1, asks the router for an escalation, invokes
//! the chosen detector, maps the final signal through the policy engine and
//! emits an immutable verdict. Errors from external dependencies fail open
//! inside the tiers; an unexpected internal error is the one place the
//! system fails closed, because the cause is unknown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::audit::AuditSink;
use crate::error::Result;
use crate::monitor::TierMonitor;
use crate::policy::PolicyEngine;
use crate::router::TierRouter;
use crate::signals::{DetectionMethod, Detector, PatternMatcher, SignalResult, Tier};
use crate::verdict::{Action, FailureClass, FiredSignal, Severity, Verdict};

/// Default per-request budget.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Request context forwarded to Tier 3.
pub type RequestContext = HashMap<String, serde_json::Value>;

/// Builder for [`ControlTower`].
#[derive(Default)]
pub struct ControlTowerBuilder {
    matcher: Option<PatternMatcher>,
    router: Option<TierRouter>,
    policy: Option<PolicyEngine>,
    tier2: Option<Arc<dyn Detector>>,
    tier3: Option<Arc<dyn Detector>>,
    audit: Option<Arc<dyn AuditSink>>,
    warmup: Option<u64>,
}

impl ControlTowerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matcher(mut self, matcher: PatternMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_router(mut self, router: TierRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Install the Tier-2 semantic detector.
    pub fn with_tier2(mut self, detector: Arc<dyn Detector>) -> Self {
        self.tier2 = Some(detector);
        self
    }

    /// Install the Tier-3 LLM agent.
    pub fn with_tier3(mut self, detector: Arc<dyn Detector>) -> Self {
        self.tier3 = Some(detector);
        self
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_monitor_warmup(mut self, warmup: u64) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn build(self) -> ControlTower {
        ControlTower {
            matcher: self.matcher.unwrap_or_default(),
            router: self.router.unwrap_or_default(),
            policy: self.policy.unwrap_or_else(PolicyEngine::builtin),
            tier2: self.tier2,
            tier3: self.tier3,
            audit: self.audit,
            monitor: match self.warmup {
                Some(warmup) => TierMonitor::with_warmup(warmup),
                None => TierMonitor::new(),
            },
        }
    }
}

/// Three-tier detection and enforcement pipeline.
pub struct ControlTower {
    matcher: PatternMatcher,
    router: TierRouter,
    policy: PolicyEngine,
    tier2: Option<Arc<dyn Detector>>,
    tier3: Option<Arc<dyn Detector>>,
    audit: Option<Arc<dyn AuditSink>>,
    monitor: TierMonitor,
}

impl ControlTower {
    pub fn builder() -> ControlTowerBuilder {
        ControlTowerBuilder::new()
    }

    /// Evaluate text against the pipeline and return a verdict.
    ///
    /// Never returns an error: dependency failures fail open inside their
    /// tier, and an unexpected internal error synthesizes a fail-closed
    /// BLOCK verdict. Counters update either way, after the audit append.
    pub async fn evaluate(
        &self,
        text: &str,
        context: &RequestContext,
        deadline: Duration,
    ) -> Verdict {
        let start = Instant::now();

        let verdict = match self.evaluate_inner(text, context, deadline, start).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(error = %e, "internal pipeline error - failing closed");
                self.fail_closed_verdict(start)
            }
        };

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.append(&verdict) {
                warn!(error = %e, "audit append failed");
            }
        }

        self.monitor.record(
            verdict.tier_used,
            verdict.processing_time_ms,
            verdict.failure_class.is_some(),
        );

        verdict
    }

    async fn evaluate_inner(
        &self,
        text: &str,
        context: &RequestContext,
        deadline: Duration,
        start: Instant,
    ) -> Result<Verdict> {
        let tier1 = self.matcher.detect(text);

        // Validation outcomes (empty input, DoS probes) bypass routing.
        let is_validation = matches!(
            tier1.method,
            DetectionMethod::Skipped
                | DetectionMethod::DosProtection
                | DetectionMethod::PatternAnalysis
        );

        let (signal, tier_used) = if is_validation {
            (tier1, Tier::One)
        } else {
            let decision = self.router.route(&tier1);
            debug!(tier = %decision.tier, reason = %decision.reason, "tier selected");
            self.dispatch(decision.tier, tier1, text, context, deadline)
                .await?
        };

        let policy_decision =
            self.policy
                .decide(signal.failure_class, signal.confidence, signal.should_allow);

        let fired_signals = if signal.should_allow == Some(false) || signal.failure_class.is_some()
        {
            vec![FiredSignal::new(
                signal
                    .signal_name
                    .clone()
                    .unwrap_or_else(|| signal.method.to_string()),
                signal.confidence,
                signal.explanation.clone(),
            )]
        } else {
            Vec::new()
        };

        Ok(Verdict {
            verdict_id: uuid::Uuid::new_v4(),
            severity: policy_decision.severity,
            action: policy_decision.action,
            failure_class: signal.failure_class,
            fired_signals,
            reason: policy_decision.reason,
            confidence: signal.confidence,
            policy_version: self.policy.version().to_string(),
            timestamp: chrono::Utc::now(),
            tier_used,
            method: signal.method,
            processing_time_ms: elapsed_ms(start),
        })
    }

    /// Execute the routed tier, degrading when a detector is absent:
    /// a missing Tier 2 hands its candidates to Tier 3, and with no
    /// escalation tier at all the Tier-1 signal stands.
    async fn dispatch(
        &self,
        tier: Tier,
        tier1: SignalResult,
        text: &str,
        context: &RequestContext,
        deadline: Duration,
    ) -> Result<(SignalResult, Tier)> {
        match tier {
            Tier::One => Ok((tier1, Tier::One)),
            Tier::Two => {
                if let Some(tier2) = &self.tier2 {
                    let signal = tier2.detect(text, context, deadline).await?;
                    Ok((signal, Tier::Two))
                } else if let Some(tier3) = &self.tier3 {
                    debug!("semantic detector unavailable - routing through Tier 3");
                    let signal = tier3.detect(text, context, deadline).await?;
                    Ok((signal, Tier::Three))
                } else {
                    Ok((tier1, Tier::One))
                }
            }
            Tier::Three => {
                if let Some(tier3) = &self.tier3 {
                    let signal = tier3.detect(text, context, deadline).await?;
                    Ok((signal, Tier::Three))
                } else if self.tier2.is_some() || self.tier3.is_some() {
                    Ok((
                        SignalResult::allow(
                            DetectionMethod::LlmUnavailable,
                            0.5,
                            "LLM agent unavailable - allowing conservatively",
                        ),
                        Tier::Three,
                    ))
                } else {
                    Ok((tier1, Tier::One))
                }
            }
        }
    }

    fn fail_closed_verdict(&self, start: Instant) -> Verdict {
        Verdict {
            verdict_id: uuid::Uuid::new_v4(),
            severity: Severity::High,
            action: Action::Block,
            failure_class: Some(FailureClass::PromptInjection),
            fired_signals: Vec::new(),
            reason: "system error - blocking for safety".to_string(),
            confidence: 0.6,
            policy_version: self.policy.version().to_string(),
            timestamp: chrono::Utc::now(),
            tier_used: Tier::One,
            method: DetectionMethod::ErrorFallback,
            processing_time_ms: elapsed_ms(start),
        }
    }

    /// Distribution monitor for health and stats.
    pub fn monitor(&self) -> &TierMonitor {
        &self.monitor
    }

    /// Policy engine in force.
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Tier availability flags `(tier1, tier2, tier3)`.
    pub fn tier_availability(&self) -> (bool, bool, bool) {
        (true, self.tier2.is_some(), self.tier3.is_some())
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}
