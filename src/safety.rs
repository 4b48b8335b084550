//! The composite Safety Gate: rate limiter, constraint validator, cooldown
//! tracker, and approval-mode dispatcher, applied in that order. The first
//! failure rejects the action with a specific reason (§4.5).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::crd::{ApprovalMode, ConstraintsSpec};

/* ============================= REJECTION TAXONOMY ============================= */

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRejection {
    #[error("rate_limited")]
    RateLimited,
    #[error("action_forbidden")]
    ActionForbidden,
    #[error("namespace_forbidden")]
    NamespaceForbidden,
    #[error("cooldown_active")]
    CooldownActive,
}

impl SafetyRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SafetyRejection::RateLimited => "rate_limited",
            SafetyRejection::ActionForbidden => "action_forbidden",
            SafetyRejection::NamespaceForbidden => "namespace_forbidden",
            SafetyRejection::CooldownActive => "cooldown_active",
        }
    }
}

/// What the caller should do with an action that cleared (or didn't clear)
/// the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// `autonomous` — proceed straight to execution.
    Execute,
    /// `dry_run` — proceed to execution, but the Action Executor must not
    /// mutate cluster state.
    ExecuteDryRun,
    /// `human_in_loop` — hold in `PendingApproval`; do not execute.
    AwaitApproval,
    Rejected(SafetyRejection),
}

/* ============================= RATE LIMITER ============================= */

#[derive(Debug, Clone)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by `<namespace>/<name>`. Counters are
/// process-local: a restart loses the window (documented loss, spec.md §9).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    window: Duration,
    max: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
            window,
            max,
        }
    }

    pub fn default_policy() -> Self {
        RateLimiter::new(config::DEFAULT_RATE_LIMIT_WINDOW, config::DEFAULT_RATE_LIMIT_MAX)
    }

    /// Returns `true` if the action is allowed (and consumes one slot),
    /// `false` if the window is exhausted.
    pub fn check_and_increment(&self, key: &str) -> bool {
        self.check_and_increment_at(key, Instant::now())
    }

    fn check_and_increment_at(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        if now.duration_since(bucket.window_start) > self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count < self.max {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    pub fn current_count(&self, key: &str) -> u32 {
        self.buckets
            .lock()
            .expect("rate limiter mutex poisoned")
            .get(key)
            .map(|b| b.count)
            .unwrap_or(0)
    }
}

/* ============================= COOLDOWN ============================= */

/// Applied only to spec-level (engine-initiated) actions — external MCP
/// tool calls have no spec context to key a cooldown on (spec.md §4.5.3,
/// §9 Open Question).
pub fn cooldown_active(last_remediated_at_epoch: Option<i64>, cooldown_seconds: u64, now_epoch: i64) -> bool {
    match last_remediated_at_epoch {
        Some(last) => (now_epoch - last) < cooldown_seconds as i64,
        None => false,
    }
}

/* ============================= CONSTRAINT VALIDATOR ============================= */

pub fn validate_constraints(
    constraints: &ConstraintsSpec,
    action_kind: &str,
    target_namespace: Option<&str>,
    spec_namespace: &str,
) -> Result<(), SafetyRejection> {
    if !constraints.allowed_actions.is_empty() && !constraints.allowed_actions.contains(action_kind) {
        return Err(SafetyRejection::ActionForbidden);
    }

    let namespace = target_namespace.unwrap_or(spec_namespace);
    if constraints.forbidden_namespaces.contains(namespace) {
        return Err(SafetyRejection::NamespaceForbidden);
    }

    Ok(())
}

/* ============================= GATE ============================= */

pub struct SafetyGate {
    pub rate_limiter: RateLimiter,
}

impl Default for SafetyGate {
    fn default() -> Self {
        SafetyGate {
            rate_limiter: RateLimiter::default_policy(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl SafetyGate {
    pub fn new(window: Duration, max: u32) -> Self {
        SafetyGate {
            rate_limiter: RateLimiter::new(window, max),
        }
    }

    /// Evaluate an engine-initiated (spec-level) action against all four
    /// checks in order. External MCP action calls should use
    /// `evaluate_external`, which skips the cooldown check.
    pub fn evaluate(
        &self,
        spec_key: &str,
        spec_namespace: &str,
        action_kind: &str,
        target_namespace: Option<&str>,
        constraints: &ConstraintsSpec,
        last_remediated_at_epoch: Option<i64>,
        now_epoch: i64,
        approval_mode: ApprovalMode,
    ) -> GateDecision {
        if !self.rate_limiter.check_and_increment(spec_key) {
            return GateDecision::Rejected(SafetyRejection::RateLimited);
        }

        if let Err(rej) = validate_constraints(constraints, action_kind, target_namespace, spec_namespace) {
            return GateDecision::Rejected(rej);
        }

        let cooldown = constraints
            .cooldown_seconds
            .unwrap_or(config::DEFAULT_COOLDOWN_SECONDS);
        if cooldown_active(last_remediated_at_epoch, cooldown, now_epoch) {
            return GateDecision::Rejected(SafetyRejection::CooldownActive);
        }

        match approval_mode {
            ApprovalMode::Autonomous => GateDecision::Execute,
            ApprovalMode::DryRun => GateDecision::ExecuteDryRun,
            ApprovalMode::HumanInLoop => GateDecision::AwaitApproval,
        }
    }

    /// External MCP callers performing action tool calls: rate limit +
    /// constraints only, no cooldown (no spec context), no approval-mode
    /// dispatch (the call either proceeds or is rejected outright).
    pub fn evaluate_external(
        &self,
        connection_key: &str,
        action_kind: &str,
        target_namespace: Option<&str>,
        constraints: &ConstraintsSpec,
    ) -> GateDecision {
        if !self.rate_limiter.check_and_increment(connection_key) {
            return GateDecision::Rejected(SafetyRejection::RateLimited);
        }
        if let Err(rej) = validate_constraints(constraints, action_kind, target_namespace, "") {
            return GateDecision::Rejected(rej);
        }
        GateDecision::Execute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(allowed: &[&str], forbidden: &[&str]) -> ConstraintsSpec {
        ConstraintsSpec {
            allowed_actions: allowed.iter().map(|s| s.to_string()).collect(),
            forbidden_namespaces: forbidden.iter().map(|s| s.to_string()).collect(),
            max_concurrent: Some(1),
            cooldown_seconds: Some(60),
        }
    }

    #[test]
    fn test_rate_limiter_allows_up_to_max() {
        let limiter = RateLimiter::new(Duration::from_secs(300), 10);
        for _ in 0..10 {
            assert!(limiter.check_and_increment("ns/spec"));
        }
        assert!(!limiter.check_and_increment("ns/spec"));
    }

    #[test]
    fn test_rate_limiter_resets_after_window() {
        let limiter = RateLimiter::new(Duration::from_millis(50), 1);
        let now = Instant::now();
        assert!(limiter.check_and_increment_at("k", now));
        assert!(!limiter.check_and_increment_at("k", now));
        let later = now + Duration::from_millis(60);
        assert!(limiter.check_and_increment_at("k", later));
    }

    #[test]
    fn test_rate_limiter_keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(300), 1);
        assert!(limiter.check_and_increment("a"));
        assert!(limiter.check_and_increment("b"));
        assert!(!limiter.check_and_increment("a"));
    }

    #[test]
    fn test_constraint_validator_empty_allowed_set_permits_everything() {
        let c = constraints(&[], &[]);
        assert!(validate_constraints(&c, "scale", None, "default").is_ok());
    }

    #[test]
    fn test_constraint_validator_rejects_disallowed_action() {
        let c = constraints(&["scale"], &[]);
        let err = validate_constraints(&c, "restart", None, "default").unwrap_err();
        assert_eq!(err, SafetyRejection::ActionForbidden);
    }

    #[test]
    fn test_constraint_validator_rejects_forbidden_namespace() {
        let c = constraints(&[], &["kube-system"]);
        let err = validate_constraints(&c, "restart", Some("kube-system"), "default").unwrap_err();
        assert_eq!(err, SafetyRejection::NamespaceForbidden);
    }

    #[test]
    fn test_constraint_validator_falls_back_to_spec_namespace() {
        let c = constraints(&[], &["kube-system"]);
        // parameters carry no namespace (e.g. cordon/drain) -> falls back to spec ns
        assert!(validate_constraints(&c, "cordon", None, "default").is_ok());
        let err = validate_constraints(&c, "cordon", None, "kube-system").unwrap_err();
        assert_eq!(err, SafetyRejection::NamespaceForbidden);
    }

    #[test]
    fn test_cooldown_active_within_window() {
        assert!(cooldown_active(Some(100), 60, 130));
        assert!(!cooldown_active(Some(100), 60, 200));
        assert!(!cooldown_active(None, 60, 200));
    }

    #[test]
    fn test_gate_autonomous_executes() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&["scale"], &[]);
        let decision = gate.evaluate(
            "ns/spec", "default", "scale", Some("default"), &c, None, 1000, ApprovalMode::Autonomous,
        );
        assert_eq!(decision, GateDecision::Execute);
    }

    #[test]
    fn test_gate_dry_run_does_not_block_on_cooldown_bypass() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&[], &[]);
        let decision = gate.evaluate(
            "ns/spec", "default", "scale", None, &c, None, 1000, ApprovalMode::DryRun,
        );
        assert_eq!(decision, GateDecision::ExecuteDryRun);
    }

    #[test]
    fn test_gate_human_in_loop_awaits_approval() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&[], &[]);
        let decision = gate.evaluate(
            "ns/spec", "default", "scale", None, &c, None, 1000, ApprovalMode::HumanInLoop,
        );
        assert_eq!(decision, GateDecision::AwaitApproval);
    }

    #[test]
    fn test_gate_rejects_rate_limited_before_other_checks() {
        let gate = SafetyGate::new(Duration::from_secs(300), 1);
        let c = constraints(&[], &["default"]); // would also fail namespace check
        let key = "ns/spec";
        assert_eq!(
            gate.evaluate(key, "default", "scale", None, &c, None, 1000, ApprovalMode::Autonomous),
            GateDecision::Execute
        );
        // second call: rate limit fires first even though namespace is also forbidden
        assert_eq!(
            gate.evaluate(key, "default", "scale", None, &c, None, 1000, ApprovalMode::Autonomous),
            GateDecision::Rejected(SafetyRejection::RateLimited)
        );
    }

    #[test]
    fn test_gate_rejects_cooldown_active() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&[], &[]);
        let decision = gate.evaluate(
            "ns/spec", "default", "scale", None, &c, Some(100), 130, ApprovalMode::Autonomous,
        );
        assert_eq!(decision, GateDecision::Rejected(SafetyRejection::CooldownActive));
    }

    #[test]
    fn test_external_evaluation_skips_cooldown() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&[], &[]);
        // no cooldown param at all in signature -- proves it can't block
        let decision = gate.evaluate_external("conn-1", "restart", Some("default"), &c);
        assert_eq!(decision, GateDecision::Execute);
    }

    #[test]
    fn test_external_evaluation_still_enforces_constraints() {
        let gate = SafetyGate::new(Duration::from_secs(300), 10);
        let c = constraints(&["scale"], &[]);
        let decision = gate.evaluate_external("conn-1", "restart", Some("default"), &c);
        assert_eq!(decision, GateDecision::Rejected(SafetyRejection::ActionForbidden));
    }

    #[test]
    fn test_rejection_code_strings() {
        assert_eq!(SafetyRejection::RateLimited.code(), "rate_limited");
        assert_eq!(SafetyRejection::ActionForbidden.code(), "action_forbidden");
        assert_eq!(SafetyRejection::NamespaceForbidden.code(), "namespace_forbidden");
        assert_eq!(SafetyRejection::CooldownActive.code(), "cooldown_active");
    }

    #[test]
    fn test_scenario_rate_limit_enforced_12_triggers_10_pass() {
        // Concrete scenario 1 from spec.md §8.
        let limiter = RateLimiter::new(Duration::from_secs(300), 10);
        let mut allowed = 0;
        let mut rejected = 0;
        for _ in 0..12 {
            if limiter.check_and_increment("default/example") {
                allowed += 1;
            } else {
                rejected += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(rejected, 2);
    }
}
