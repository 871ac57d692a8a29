//! Property-based tests for pipeline invariants.
//!
//! These cover the quantified guarantees the design leans on: Tier-1
//! determinism and bounded evaluation, router totality, policy monotonicity
//! in confidence, cache-key stability, and counter consistency.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::HashMap;

    use crate::agent::DecisionCache;
    use crate::monitor::TierMonitor;
    use crate::policy::PolicyEngine;
    use crate::router::TierRouter;
    use crate::signals::{DetectionMethod, PatternMatcher, SignalResult, Tier};
    use crate::verdict::{Action, FailureClass};

    fn any_failure_class() -> impl Strategy<Value = FailureClass> {
        prop_oneof![
            Just(FailureClass::PromptInjection),
            Just(FailureClass::Bias),
            Just(FailureClass::Toxicity),
            Just(FailureClass::FabricatedConcept),
            Just(FailureClass::FabricatedFact),
            Just(FailureClass::MissingGrounding),
            Just(FailureClass::Overconfidence),
            Just(FailureClass::DomainMismatch),
        ]
    }

    fn any_method() -> impl Strategy<Value = DetectionMethod> {
        prop_oneof![
            Just(DetectionMethod::RegexStrong),
            Just(DetectionMethod::RegexAnti),
            Just(DetectionMethod::RegexUncertain),
            Just(DetectionMethod::Semantic),
            Just(DetectionMethod::LlmAgent),
            Just(DetectionMethod::Skipped),
        ]
    }

    // =========================================================================
    // Tier-1 matcher properties
    // =========================================================================

    proptest! {
        /// Same input, same signal, byte for byte.
        #[test]
        fn matcher_is_deterministic(text in "\\PC{0,400}") {
            let matcher = PatternMatcher::default();
            let a = matcher.detect(&text);
            let b = matcher.detect(&text);
            prop_assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&b).unwrap()
            );
        }

        /// Every signal is well-formed: confidence in range, gray zone only
        /// from the uncertain method.
        #[test]
        fn matcher_signals_are_well_formed(text in "\\PC{0,400}") {
            let matcher = PatternMatcher::default();
            let signal = matcher.detect(&text);
            prop_assert!((0.0..=1.0).contains(&signal.confidence));
            if signal.should_allow.is_none() {
                prop_assert_eq!(signal.method, DetectionMethod::RegexUncertain);
            }
            if signal.failure_class.is_some() {
                prop_assert_eq!(signal.should_allow, Some(false));
            }
        }

        /// Single-character floods of any length classify quickly and never
        /// panic; lengths beyond the ceiling become DoS verdicts.
        #[test]
        fn matcher_handles_floods(c in proptest::char::range('!', 'z'), k in 1usize..12_000) {
            let flood: String = std::iter::repeat(c).take(k).collect();
            let matcher = PatternMatcher::default();
            let start = std::time::Instant::now();
            let signal = matcher.detect(&flood);
            prop_assert!(start.elapsed().as_millis() < 1_000);
            if k > 10_000 {
                prop_assert_eq!(signal.method, DetectionMethod::DosProtection);
            }
        }
    }

    // =========================================================================
    // Router properties
    // =========================================================================

    proptest! {
        /// The router is total and only accepts Tier 1 for confident regex
        /// outcomes.
        #[test]
        fn router_accepts_tier1_only_when_confident(
            confidence in 0.0f64..1.0,
            method in any_method(),
            should_allow in prop_oneof![Just(None), Just(Some(true)), Just(Some(false))]
        ) {
            let router = TierRouter::new();
            let signal = SignalResult {
                failure_class: None,
                confidence,
                method,
                should_allow,
                explanation: String::new(),
                signal_name: None,
            };
            let decision = router.route(&signal);

            if decision.tier == Tier::One {
                prop_assert!(confidence >= 0.8);
                prop_assert!(matches!(
                    method,
                    DetectionMethod::RegexStrong | DetectionMethod::RegexAnti
                ));
            }

            // The gray zone never stays at Tier 1.
            if should_allow.is_none() {
                prop_assert!(decision.tier != Tier::One);
            }
        }
    }

    // =========================================================================
    // Policy properties
    // =========================================================================

    proptest! {
        /// For a fixed failure class, increasing confidence never weakens
        /// the action.
        #[test]
        fn policy_is_monotone_in_confidence(
            failure_class in any_failure_class(),
            c1 in 0.0f64..1.0,
            c2 in 0.0f64..1.0
        ) {
            let engine = PolicyEngine::builtin();
            let (low, high) = if c1 <= c2 { (c1, c2) } else { (c2, c1) };

            let weak = engine.decide(Some(failure_class), low, Some(false));
            let strong = engine.decide(Some(failure_class), high, Some(false));
            prop_assert!(strong.action >= weak.action);
        }

        /// Severity is a function of the class alone; confidence only
        /// demotes the action.
        #[test]
        fn policy_severity_ignores_confidence(
            failure_class in any_failure_class(),
            c1 in 0.0f64..1.0,
            c2 in 0.0f64..1.0
        ) {
            let engine = PolicyEngine::builtin();
            let a = engine.decide(Some(failure_class), c1, Some(false));
            let b = engine.decide(Some(failure_class), c2, Some(false));
            prop_assert_eq!(a.severity, b.severity);
        }
    }

    // =========================================================================
    // Cache key properties
    // =========================================================================

    proptest! {
        /// The key is a pure function of prompt and context value set,
        /// independent of map insertion order.
        #[test]
        fn cache_key_is_stable(
            prompt in "\\PC{0,120}",
            pairs in proptest::collection::vec(("[a-z]{1,8}", "\\PC{0,20}"), 0..6)
        ) {
            let forward: HashMap<String, serde_json::Value> = pairs
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let reversed: HashMap<String, serde_json::Value> = pairs
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();

            prop_assert_eq!(
                DecisionCache::compute_key(&prompt, &forward),
                DecisionCache::compute_key(&prompt, &reversed)
            );
        }

        /// Distinct prompts produce distinct keys.
        #[test]
        fn cache_key_separates_prompts(a in "[a-z]{1,40}", b in "[a-z]{1,40}") {
            prop_assume!(a != b);
            let context = HashMap::new();
            prop_assert_ne!(
                DecisionCache::compute_key(&a, &context),
                DecisionCache::compute_key(&b, &context)
            );
        }
    }

    // =========================================================================
    // Monitor properties
    // =========================================================================

    proptest! {
        /// After any sequence of recordings, the tier counters sum to the
        /// total.
        #[test]
        fn monitor_counters_are_consistent(
            tiers in proptest::collection::vec(1u8..=3, 0..200)
        ) {
            let monitor = TierMonitor::new();
            for t in &tiers {
                let tier = Tier::try_from(*t).unwrap();
                monitor.record(tier, 1.0, false);
            }
            let (total, t1, t2, t3) = monitor.counts();
            prop_assert_eq!(total, tiers.len() as u64);
            prop_assert_eq!(t1 + t2 + t3, total);

            let dist = monitor.distribution();
            if total > 0 {
                let sum = dist.tier1_pct + dist.tier2_pct + dist.tier3_pct;
                prop_assert!((sum - 100.0).abs() < 1e-6);
            }
        }
    }

    // =========================================================================
    // Allow-pattern priority (P5, Tier-1 scope)
    // =========================================================================

    proptest! {
        /// Appending an academic citation to any short text guarantees the
        /// Tier-1 signal is benign, whatever else the text contains.
        #[test]
        fn allow_pattern_wins(text in "[ -~]{0,80}") {
            let cited = format!("{} (Smith et al., 2020)", text);
            let matcher = PatternMatcher::default();
            let signal = matcher.detect(&cited);
            prop_assert_eq!(signal.should_allow, Some(true));
            prop_assert_eq!(signal.method, DetectionMethod::RegexAnti);
        }
    }

    #[test]
    fn action_order_matches_enforcement_strength() {
        assert!(Action::Block > Action::Warn);
        assert!(Action::Warn > Action::Log);
        assert!(Action::Log > Action::Allow);
    }
}
