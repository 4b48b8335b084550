use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= TRIGGER ============================= */

/// The condition that causes a spec to fire this reconcile cycle.
///
/// Only the threshold field matching `type` is meaningful; the others are
/// accepted but ignored for forward-compatibility (see spec ambiguity note
/// in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub kind: TriggerKind,

    /// Used when `type == anomaly`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,

    /// Used when `type == sloViolation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_threshold: Option<f64>,

    /// Used when `type == forecast`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct_change: Option<f64>,

    /// Used when `type == event`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    #[default]
    Anomaly,
    SloViolation,
    Forecast,
    Event,
}

/* ============================= LLM CONFIG ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct LlmSpec {
    /// `local` or `remote`.
    pub provider: String,
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Reference to a Secret holding the provider credential; never the raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,

    /// 0.0 - 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/* ============================= CONTEXT CONFIG ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpec {
    #[serde(default)]
    pub include_k8sgpt: bool,
    #[serde(default)]
    pub include_metrics: bool,
    #[serde(default)]
    pub include_network_flows: bool,
    #[serde(default)]
    pub include_events: bool,

    /// Duration string, e.g. "15m".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,

    #[serde(default)]
    pub namespaces: Vec<String>,
}

/* ============================= APPROVAL MODE ============================= */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Autonomous,
    HumanInLoop,
    DryRun,
}

/* ============================= CONSTRAINTS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsSpec {
    #[serde(default)]
    pub allowed_actions: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub forbidden_namespaces: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub max_concurrent: Option<u32>,

    /// Default 300 (5 minutes) when absent — see `config::DEFAULT_COOLDOWN_SECONDS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

/* ============================= SPEC ============================= */

/// AutonomousActionSpec is the user-authored declaration of autonomous
/// remediation intent for a namespace or workload family.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "aiops.prophet.io",
    version = "v1alpha1",
    kind = "AutonomousAction",
    plural = "autonomousactions",
    status = "AutonomousActionStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Actions", "type":"integer", "jsonPath":".status.actionCount"}"#,
    printcolumn = r#"{"name":"Last Triggered", "type":"string", "jsonPath":".status.lastTriggeredAt"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AutonomousActionSpec {
    pub trigger: TriggerSpec,
    pub llm: LlmSpec,

    #[serde(default)]
    pub context: ContextSpec,

    #[serde(default)]
    pub approval_mode: ApprovalMode,

    #[serde(default)]
    pub constraints: ConstraintsSpec,
}

/* ============================= PROPOSED ACTION ============================= */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Structured parameters for a proposed action, keyed by `ActionKind`.
///
/// Each variant's schema is the strict contract enforced by the
/// corresponding tool handler in `catalog`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionParameters {
    Scale {
        namespace: String,
        deployment: String,
        replicas: u32,
    },
    Restart {
        namespace: String,
        selector: std::collections::BTreeMap<String, String>,
    },
    Cordon {
        node: String,
    },
    Drain {
        node: String,
        #[serde(default)]
        ignore_daemonsets: bool,
        #[serde(default)]
        grace_period_seconds: Option<i64>,
    },
    Rollback {
        namespace: String,
        deployment: String,
        #[serde(default)]
        target_revision: Option<i64>,
    },
    NetworkPolicy {
        namespace: String,
        policy_spec: serde_json::Value,
    },
}

impl ActionParameters {
    /// The action-kind string used by the Safety Gate and audit trail,
    /// matching `Constraints.allowed_actions` entries.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionParameters::Scale { .. } => "scale",
            ActionParameters::Restart { .. } => "restart",
            ActionParameters::Cordon { .. } => "cordon",
            ActionParameters::Drain { .. } => "drain",
            ActionParameters::Rollback { .. } => "rollback",
            ActionParameters::NetworkPolicy { .. } => "network_policy",
        }
    }

    /// The namespace targeted by this action, when the kind carries one.
    /// `cordon`/`drain` target a node, not a namespace, and return `None`.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            ActionParameters::Scale { namespace, .. } => Some(namespace),
            ActionParameters::Restart { namespace, .. } => Some(namespace),
            ActionParameters::Rollback { namespace, .. } => Some(namespace),
            ActionParameters::NetworkPolicy { namespace, .. } => Some(namespace),
            ActionParameters::Cordon { .. } | ActionParameters::Drain { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub description: String,
    pub parameters: Option<ActionParameters>,
    pub confidence: f64,
    pub risk: RiskLevel,
}

/* ============================= EXECUTION RESULT ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub executed_at: String,
    pub output: String,
    pub duration_seconds: f64,
}

/* ============================= CONDITIONS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: String,
}

/* ============================= PHASE ============================= */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Phase {
    #[default]
    Monitoring,
    Triggered,
    Reasoning,
    PendingApproval,
    Executing,
    Completed,
    Failed,
}

/* ============================= STATUS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutonomousActionStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<String>,

    #[serde(default)]
    pub action_count: u64,

    /// Free-text justification from the LLM, truncated (see `MAX_REASONING_CHARS`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_action: Option<ProposedAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,

    #[serde(default)]
    pub conditions: Vec<ActionCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set by an external approval workflow while `phase == PendingApproval`.
    #[serde(default)]
    pub approved: bool,

    /// Unix-epoch seconds of the last *remediated* action, used by the
    /// cooldown check. Distinct from `last_triggered_at`, which updates on
    /// every trigger regardless of outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_remediated_at_epoch: Option<i64>,
}

impl AutonomousActionStatus {
    pub const APPROVED_CONDITION: &'static str = "Approved";

    pub fn is_approved(&self) -> bool {
        self.approved
            || self
                .conditions
                .iter()
                .any(|c| c.kind == Self::APPROVED_CONDITION && c.status == "True")
    }
}
