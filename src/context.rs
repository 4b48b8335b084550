//! Context Gatherer (§4.3): composes the bounded `{key -> value}` map fed
//! to the LLM Adapter. Never aborts the cycle on a single source failure —
//! a failed source's value records the failure and the cycle continues.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::catalog::{dispatch, ToolContext};
use crate::config::MAX_CONTEXT_VALUES;
use crate::crd::ContextSpec;

/// Stable drop order when the map exceeds `MAX_CONTEXT_VALUES`: entries
/// whose key falls in an earlier bucket are dropped before later ones.
/// `nodes` is never dropped — it is the one key always present regardless
/// of `ContextSpec` (§4.3).
fn drop_priority(key: &str) -> u8 {
    if key.starts_with("events_") {
        0
    } else if key == "metrics" {
        1
    } else if key == "diagnostic" || key == "network_flows" {
        2
    } else if key.starts_with("pods_") {
        3
    } else {
        4 // nodes, and anything unrecognized, survive longest
    }
}

async fn fetch(ctx: &ToolContext, tool: &str, args: Value) -> String {
    match dispatch(ctx, tool, args).await {
        Ok(value) => value.to_string(),
        Err(e) => json!({ "error": e.to_string() }).to_string(),
    }
}

/// Builds the context map for one reconcile cycle. `namespaces` drives the
/// per-namespace keys; `spec` selects which optional sources are included.
pub async fn gather(ctx: &ToolContext, spec: &ContextSpec) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    values.insert(
        "nodes".to_string(),
        fetch(ctx, "k8s_get_nodes", json!({})).await,
    );

    for namespace in &spec.namespaces {
        let value = fetch(ctx, "k8s_get_pods", json!({ "namespace": namespace })).await;
        values.insert(format!("pods_{namespace}"), value);

        if spec.include_events {
            let value = fetch(ctx, "k8s_get_events", json!({ "namespace": namespace })).await;
            values.insert(format!("events_{namespace}"), value);
        }
    }

    if spec.include_metrics {
        let namespace = spec.namespaces.first().cloned().unwrap_or_default();
        let value = fetch(ctx, "k8s_get_metrics", json!({ "namespace": namespace })).await;
        values.insert("metrics".to_string(), value);
    }

    if spec.include_k8sgpt {
        let namespace = spec.namespaces.first().cloned().unwrap_or_default();
        let value = fetch(ctx, "k8s_get_diagnostic_analysis", json!({ "namespace": namespace })).await;
        values.insert("diagnostic".to_string(), value);
    }

    if spec.include_network_flows {
        // No network-flow source is wired into this environment (spec.md
        // §4.3: "source may be unimplemented"); record a stable marker so
        // the prompt always has the key rather than omitting it silently.
        values.insert(
            "network_flows".to_string(),
            json!({ "status": "unavailable", "note": "network flow source not wired in this deployment" }).to_string(),
        );
    }

    truncate(values)
}

/// Drops lowest-priority keys until the map fits `MAX_CONTEXT_VALUES`.
fn truncate(mut values: BTreeMap<String, String>) -> BTreeMap<String, String> {
    while values.len() > MAX_CONTEXT_VALUES {
        let Some(victim) = values
            .keys()
            .min_by_key(|k| drop_priority(k))
            .cloned()
        else {
            break;
        };
        values.remove(&victim);
    }
    values
}
