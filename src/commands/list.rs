use anyhow::Context;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use remediation_engine::crd::AutonomousAction;

pub async fn run() -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    let specs: Api<AutonomousAction> = Api::all(client);

    let list = specs
        .list(&ListParams::default())
        .await
        .context("Failed to list AutonomousAction specs. Check RBAC permissions.")?;

    let mut rows: Vec<(String, String, String, u64, String)> = list
        .iter()
        .map(|spec| {
            let namespace = spec.namespace().unwrap_or_default();
            let name = spec.name_any();
            let status = spec.status.as_ref();
            let phase = status.map(|s| format!("{:?}", s.phase)).unwrap_or_else(|| "Monitoring".to_string());
            let action_count = status.map(|s| s.action_count).unwrap_or(0);
            let last_triggered = status
                .and_then(|s| s.last_triggered_at.clone())
                .unwrap_or_else(|| "-".to_string());
            (namespace, name, phase, action_count, last_triggered)
        })
        .collect();

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    println!(
        "{:<20} {:<30} {:<16} {:<8} {:<25}",
        "NAMESPACE", "NAME", "PHASE", "ACTIONS", "LAST TRIGGERED"
    );
    println!("{}", "-".repeat(99));

    for (namespace, name, phase, action_count, last_triggered) in &rows {
        println!(
            "{:<20} {:<30} {:<16} {:<8} {:<25}",
            namespace, name, phase, action_count, last_triggered
        );
    }

    println!("\nTotal: {} AutonomousAction specs", rows.len());

    Ok(())
}
