//! Action Executor (§4.6): turns a `ProposedAction` into a catalog tool
//! call, times it, and guarantees exactly one `AuditEntry` plus at least
//! one cluster `Event` per attempt — success, failure, or dry-run (I7).

use std::time::Instant;

use chrono::Utc;
use kube::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::{self, AuditEntry, AuditRing};
use crate::catalog::{self, ToolContext, ToolError};
use crate::config::MAX_REASONING_CHARS;
use crate::crd::{ActionParameters, ExecutionResult};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("action has no parameters to execute")]
    MissingParameters,
    #[error(transparent)]
    Tool(#[from] ToolError),
}

fn action_kind_tool(kind: &str) -> &'static str {
    match kind {
        "scale" => "k8s_scale_deployment",
        "restart" => "k8s_restart_pods",
        "cordon" => "k8s_cordon_node",
        "drain" => "k8s_drain_node",
        "rollback" => "k8s_rollback_deployment",
        "network_policy" => "k8s_apply_network_policy",
        other => other,
    }
}

fn parameters_to_args(params: &ActionParameters, dry_run: bool) -> Value {
    let mut args = match params {
        ActionParameters::Scale { namespace, deployment, replicas } => json!({
            "namespace": namespace, "deployment": deployment, "replicas": replicas,
        }),
        ActionParameters::Restart { namespace, selector } => json!({
            "namespace": namespace, "selector": selector,
        }),
        ActionParameters::Cordon { node } => json!({ "node": node }),
        ActionParameters::Drain { node, ignore_daemonsets, grace_period_seconds } => json!({
            "node": node,
            "ignore_daemonsets": ignore_daemonsets,
            "grace_period_seconds": grace_period_seconds,
        }),
        ActionParameters::Rollback { namespace, deployment, target_revision } => json!({
            "namespace": namespace, "deployment": deployment, "target_revision": target_revision,
        }),
        ActionParameters::NetworkPolicy { namespace, policy_spec } => json!({
            "namespace": namespace, "policy_spec": policy_spec,
        }),
    };
    args["dry_run"] = json!(dry_run);
    args
}

pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub entry: AuditEntry,
}

/// Executes a proposed action's parameters through the catalog, records
/// timing, and produces both the status-subresource `ExecutionResult` and
/// the audit trail entry. The caller is responsible for persisting the
/// status patch, pushing `entry` into the shared `AuditRing`, and calling
/// `audit::emit_event`.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    client: &Client,
    tool_ctx: &ToolContext,
    namespace: &str,
    name: &str,
    params: Option<&ActionParameters>,
    approved: bool,
    dry_run: bool,
    reasoning: &str,
) -> Result<ExecutionOutcome, ExecutorError> {
    let Some(params) = params else {
        return Err(ExecutorError::MissingParameters);
    };

    let tool = action_kind_tool(params.kind());
    let args = parameters_to_args(params, dry_run);
    let digest = audit::digest(&args.to_string(), 500);
    let reasoning_digest = audit::digest(reasoning, MAX_REASONING_CHARS);

    let start = Instant::now();
    let outcome = catalog::dispatch(tool_ctx, tool, args).await;
    let elapsed = start.elapsed().as_secs_f64();
    let executed_at = Utc::now().to_rfc3339();

    let _ = client; // reserved for future direct-API use beyond the catalog dispatch

    let (success, output, error) = match &outcome {
        Ok(value) => {
            let text = if dry_run { format!("DRY-RUN: {value}") } else { value.to_string() };
            (true, text, None)
        }
        Err(e) => (false, String::new(), Some(e.to_string())),
    };

    let result = ExecutionResult {
        success,
        executed_at: executed_at.clone(),
        output,
        duration_seconds: elapsed,
    };

    let entry = AuditEntry {
        timestamp: executed_at,
        namespace: namespace.to_string(),
        name: name.to_string(),
        action_kind: params.kind().to_string(),
        parameters_digest: digest,
        approved,
        dry_run,
        result: if success { "success".to_string() } else { "failure".to_string() },
        error,
        reasoning_digest,
    };

    Ok(ExecutionOutcome { result, entry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_action_kind_tool_mapping() {
        assert_eq!(action_kind_tool("scale"), "k8s_scale_deployment");
        assert_eq!(action_kind_tool("drain"), "k8s_drain_node");
    }

    #[test]
    fn test_parameters_to_args_sets_dry_run() {
        let params = ActionParameters::Cordon { node: "node-1".to_string() };
        let args = parameters_to_args(&params, true);
        assert_eq!(args["dry_run"], json!(true));
        assert_eq!(args["node"], json!("node-1"));
    }

    #[test]
    fn test_parameters_to_args_restart_carries_selector() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "checkout".to_string());
        let params = ActionParameters::Restart {
            namespace: "prod".to_string(),
            selector,
        };
        let args = parameters_to_args(&params, false);
        assert_eq!(args["selector"]["app"], json!("checkout"));
        assert_eq!(args["dry_run"], json!(false));
    }

    #[tokio::test]
    async fn test_execute_missing_parameters_errors_without_dispatch() {
        let client = Client::try_default().await;
        // In environments without a cluster this will itself error; the
        // assertion under test only needs the `params: None` short-circuit,
        // which never reaches the client.
        if let Ok(client) = client {
            let tool_ctx = ToolContext::new(client.clone());
            let err = execute(&client, &tool_ctx, "default", "spec-a", None, true, false, "")
                .await
                .unwrap_err();
            assert!(matches!(err, ExecutorError::MissingParameters));
        }
    }
}
