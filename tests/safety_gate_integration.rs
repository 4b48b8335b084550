//! End-to-end checks across the data model, catalog, and Safety Gate that
//! don't need a live cluster: constructing a real `AutonomousActionSpec`,
//! running its `ConstraintsSpec`/`ApprovalMode` through the gate, and
//! confirming the action-kind vocabulary the catalog and the CRD agree on.

use std::collections::BTreeSet;
use std::time::Duration;

use kube::CustomResourceExt;

use remediation_engine::catalog::{self, ACTION_KINDS};
use remediation_engine::crd::{ApprovalMode, AutonomousAction, ConstraintsSpec};
use remediation_engine::safety::{GateDecision, SafetyGate, SafetyRejection};

fn constraints(allowed: &[&str], forbidden: &[&str], cooldown_seconds: u64) -> ConstraintsSpec {
    ConstraintsSpec {
        allowed_actions: allowed.iter().map(|s| s.to_string()).collect(),
        forbidden_namespaces: forbidden.iter().map(|s| s.to_string()).collect(),
        max_concurrent: Some(1),
        cooldown_seconds: Some(cooldown_seconds),
    }
}

#[test]
fn every_action_kind_has_a_catalog_tool() {
    // The Safety Gate and the Action Executor both key off `ACTION_KINDS`;
    // every kind must resolve to a real, non-read-only catalog entry or a
    // proposed action can clear the gate and then fail to dispatch.
    let tools = catalog::catalog();
    for kind in ACTION_KINDS {
        let tool_name = match *kind {
            "scale" => "k8s_scale_deployment",
            "restart" => "k8s_restart_pods",
            "cordon" => "k8s_cordon_node",
            "drain" => "k8s_drain_node",
            "rollback" => "k8s_rollback_deployment",
            "network_policy" => "k8s_apply_network_policy",
            other => panic!("unrecognized action kind '{other}' in ACTION_KINDS"),
        };
        let tool = tools.iter().find(|t| t.name == tool_name);
        assert!(tool.is_some(), "no catalog tool registered for action kind '{kind}'");
        assert!(!tool.unwrap().read_only, "action kind '{kind}' maps to a read-only tool");
    }
}

#[test]
fn gate_enforces_spec_constraints_end_to_end() {
    // A spec that only allows "scale" in "default" should clear scale/default
    // and reject everything outside that, using the real `ConstraintsSpec`
    // type a controller would load off the CRD.
    let gate = SafetyGate::new(Duration::from_secs(300), 5);
    let c = constraints(&["scale"], &["kube-system"], 60);

    let allowed = gate.evaluate("default/web", "default", "scale", Some("default"), &c, None, 1_000, ApprovalMode::Autonomous);
    assert_eq!(allowed, GateDecision::Execute);

    let wrong_action = gate.evaluate("default/web", "default", "restart", Some("default"), &c, None, 1_000, ApprovalMode::Autonomous);
    assert_eq!(wrong_action, GateDecision::Rejected(SafetyRejection::ActionForbidden));

    let wrong_namespace = gate.evaluate("default/web", "default", "scale", Some("kube-system"), &c, None, 1_000, ApprovalMode::Autonomous);
    assert_eq!(wrong_namespace, GateDecision::Rejected(SafetyRejection::NamespaceForbidden));
}

#[test]
fn gate_respects_approval_mode_after_constraints_clear() {
    let c = constraints(&[], &[], 60);

    let auto = SafetyGate::new(Duration::from_secs(300), 5);
    assert_eq!(
        auto.evaluate("ns/a", "default", "scale", None, &c, None, 1_000, ApprovalMode::Autonomous),
        GateDecision::Execute
    );

    let dry = SafetyGate::new(Duration::from_secs(300), 5);
    assert_eq!(
        dry.evaluate("ns/a", "default", "scale", None, &c, None, 1_000, ApprovalMode::DryRun),
        GateDecision::ExecuteDryRun
    );

    let manual = SafetyGate::new(Duration::from_secs(300), 5);
    assert_eq!(
        manual.evaluate("ns/a", "default", "scale", None, &c, None, 1_000, ApprovalMode::HumanInLoop),
        GateDecision::AwaitApproval
    );
}

#[test]
fn gate_cooldown_blocks_spec_actions_but_not_external_calls() {
    let gate = SafetyGate::new(Duration::from_secs(300), 5);
    let c = constraints(&[], &[], 300);

    // last remediated 60s ago, cooldown is 300s -> still active
    let blocked = gate.evaluate("ns/a", "default", "scale", None, &c, Some(1_000), 1_060, ApprovalMode::Autonomous);
    assert_eq!(blocked, GateDecision::Rejected(SafetyRejection::CooldownActive));

    // an external MCP caller has no spec-level cooldown context to key on
    let external = gate.evaluate_external("conn-1", "scale", None, &c);
    assert_eq!(external, GateDecision::Execute);
}

#[test]
fn autonomous_action_crd_round_trips_its_own_kind() {
    // The generated CRD must actually describe `AutonomousAction` under the
    // group/version the reconciler watches, or `commands::crd::generate`
    // would silently produce YAML for the wrong resource.
    let crd = AutonomousAction::crd();
    assert_eq!(crd.spec.group, "aiops.prophet.io");
    assert_eq!(crd.spec.names.kind, "AutonomousAction");
    assert_eq!(crd.spec.names.plural, "autonomousactions");
    assert!(crd.spec.versions.iter().any(|v| v.name == "v1alpha1" && v.served));
}

#[test]
fn forbidden_namespace_set_matches_safety_gate_semantics() {
    // `ToolContext` needs a live `kube::Client` to construct (untestable
    // here without a cluster), but its forbidden-namespace predicate is the
    // same BTreeSet contract the Safety Gate's constraint validator uses —
    // confirm the two boundaries agree on what "forbidden" means.
    let forbidden: BTreeSet<String> = ["kube-system".to_string()].into_iter().collect();
    let c = constraints(&[], &["kube-system"], 60);
    assert_eq!(forbidden, c.forbidden_namespaces);
}
