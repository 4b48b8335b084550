//! The Reconciler (§4.7): drives each `AutonomousAction` spec through
//! Monitoring -> Triggered -> Reasoning -> (PendingApproval | Executing) ->
//! Completed/Failed -> Monitoring.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::{Client, ResourceExt};
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use remediation_engine::audit::{self, AuditEntry, AuditRing};
use remediation_engine::catalog::ToolContext;
use remediation_engine::config::{ERROR_REQUEUE_INTERVAL, FINALIZER, MAX_REASONING_CHARS, RECONCILE_BUDGET, REQUEUE_INTERVAL};
use remediation_engine::context;
use remediation_engine::crd::{ActionParameters, ApprovalMode, AutonomousAction, ExecutionResult, Phase, ProposedAction, RiskLevel};
use remediation_engine::executor;
use remediation_engine::llm;
use remediation_engine::safety::{GateDecision, SafetyGate};
use remediation_engine::trigger;

/* ============================= PROMETHEUS ============================= */

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("autonomousaction_reconcile_total", "Total reconciliation cycles").expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

static RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("autonomousaction_reconcile_errors_total", "Total reconciliation errors").expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "autonomousaction_reconcile_duration_seconds",
        "Duration of each reconciliation cycle in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

static ACTIONS_EXECUTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("autonomousaction_actions_executed_total", "Executed actions by kind and outcome"),
        &["kind", "outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

static ACTIONS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("autonomousaction_actions_rejected_total", "Safety Gate rejections by reason"),
        &["reason"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/* ============================= STATE ============================= */

pub(crate) struct ReconcileState {
    pub(crate) ready: bool,
}

/// Per-key in-flight guard: belt-and-suspenders over `kube::runtime`'s own
/// per-object scheduling (I1/P8). A spec key present in the set has a
/// reconcile already running; a concurrent dispatch for the same key backs
/// off for one tick rather than racing the first.
struct KeyGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl KeyGuard {
    async fn try_acquire(set: Arc<Mutex<HashSet<String>>>, key: String) -> Option<KeyGuard> {
        let mut guard = set.lock().await;
        if guard.contains(&key) {
            None
        } else {
            guard.insert(key.clone());
            Some(KeyGuard { set, key })
        }
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let set = self.set.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            set.lock().await.remove(&key);
        });
    }
}

/* ============================= CONTEXT ============================= */

struct ReconcileContext {
    client: Client,
    safety: Arc<SafetyGate>,
    audit: Arc<AuditRing>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/* ============================= ENTRY ============================= */

pub async fn run(metrics_bind_address: &str, health_probe_bind_address: &str, leader_elect: bool) -> Result<()> {
    println!("Starting Prophet remediation engine reconciler...\n");

    let client = Client::try_default().await.context("Failed to load kubeconfig")?;

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    if leader_elect {
        print!("  Leader election .............. ");
        match leader::acquire(&client).await {
            Ok(true) => println!("acquired ({})", leader::IDENTITY.as_str()),
            Ok(false) => {
                println!("lost - another replica holds the lease");
                println!("\nStanding by. Exiting without starting the controller.");
                return Ok(());
            }
            Err(e) => {
                println!("FAIL");
                anyhow::bail!("Leader election failed: {e}");
            }
        }
    }

    let specs: Api<AutonomousAction> = Api::all(client.clone());

    let ctx = Arc::new(ReconcileContext {
        client: client.clone(),
        safety: Arc::new(SafetyGate::default()),
        audit: Arc::new(AuditRing::default()),
        in_flight: Arc::new(Mutex::new(HashSet::new())),
    });

    LazyLock::force(&RECONCILE_TOTAL);
    LazyLock::force(&RECONCILE_ERRORS);
    LazyLock::force(&RECONCILE_DURATION);
    LazyLock::force(&ACTIONS_EXECUTED);
    LazyLock::force(&ACTIONS_REJECTED);

    let metrics_addr: SocketAddr = metrics_bind_address.parse().context("Invalid --metrics-bind-address")?;
    let health_addr: SocketAddr = health_probe_bind_address.parse().context("Invalid --health-probe-bind-address")?;

    println!("  CRD watch .................... AutonomousAction.aiops.prophet.io/v1alpha1");
    println!("  Requeue interval .............. {}s", REQUEUE_INTERVAL.as_secs());
    println!("  Metrics server ................ http://{metrics_addr}/metrics");
    println!("  Health probe server ........... http://{health_addr}/healthz");
    println!();
    println!("Reconciler running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("reconciler_started");

    let reconcile_state = Arc::new(Mutex::new(ReconcileState { ready: false }));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let http_state = reconcile_state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle =
        tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, metrics_addr, health_addr).await });

    let controller_state = reconcile_state.clone();
    let controller = Controller::new(specs, Default::default())
        .run(reconcile, error_policy, ctx)
        .for_each(move |result| {
            let state = controller_state.clone();
            async move {
                {
                    let mut s = state.lock().await;
                    if !s.ready {
                        s.ready = true;
                    }
                }
                match result {
                    Ok((_obj, _action)) => {}
                    Err(e) => {
                        warn!(error = %e, "reconcile_dispatch_error");
                        eprintln!("[ERROR] Reconcile dispatch: {e}");
                    }
                }
            }
        });

    tokio::select! {
        _ = controller => {
            info!("controller_stream_ended");
            println!("\nController stream ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\nShutdown signal received. Stopping reconciler...");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("reconciler_stopped");
    println!("Reconciler stopped.");
    Ok(())
}

/* ============================= RECONCILE ============================= */

fn spec_key(spec: &AutonomousAction) -> String {
    format!("{}/{}", spec.namespace().unwrap_or_default(), spec.name_any())
}

async fn reconcile(spec: Arc<AutonomousAction>, ctx: Arc<ReconcileContext>) -> std::result::Result<Action, kube::Error> {
    let name = spec.name_any();
    let namespace = spec.namespace().unwrap_or_default();
    let key = spec_key(&spec);

    if spec.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&spec, &ctx.client).await;
    }

    if !has_finalizer(&spec) {
        add_finalizer(&spec, &ctx.client).await?;
    }

    let Some(_guard) = KeyGuard::try_acquire(ctx.in_flight.clone(), key.clone()).await else {
        info!(spec = %key, "reconcile_skipped_in_flight");
        return Ok(Action::requeue(Duration::from_secs(1)));
    };

    RECONCILE_TOTAL.inc();
    let _timer = RECONCILE_DURATION.start_timer();

    let phase = spec.status.as_ref().map(|s| s.phase).unwrap_or_default();
    info!(spec = %key, ?phase, "reconcile_start");

    // Reasoning/Executing are the phases with unbounded external I/O (LLM
    // call, tool dispatch); bound them to RECONCILE_BUDGET so a wedged
    // provider or cluster API can't pin a worker forever (§5 cancellation,
    // §7 `cancelled`).
    let outcome = match phase {
        Phase::Monitoring => step_monitoring(&spec, &ctx).await,
        Phase::Triggered => step_triggered(&spec, &ctx).await,
        Phase::Reasoning => with_reconcile_budget(step_reasoning(&spec, &ctx)).await,
        Phase::PendingApproval => step_pending_approval(&spec, &ctx).await,
        Phase::Executing => with_reconcile_budget(step_executing(&spec, &ctx)).await,
        Phase::Completed | Phase::Failed => step_terminal(&spec, &ctx).await,
    };

    match outcome {
        Ok(action) => {
            println!("[{}] {namespace}/{name}: {phase:?} -> requeue", Utc::now().format("%H:%M:%S"));
            Ok(action)
        }
        Err(e) => {
            warn!(spec = %key, error = %e, "reconcile_step_failed");
            let _ = patch_phase(&ctx.client, &namespace, &name, Phase::Failed, Some(e.to_string())).await;
            Ok(Action::requeue(ERROR_REQUEUE_INTERVAL))
        }
    }
}

/* ============================= STATE MACHINE STEPS ============================= */

async fn step_monitoring(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let fires = trigger::default_stub(&spec.spec.trigger)?;
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();

    if fires {
        patch_phase(&ctx.client, &namespace, &name, Phase::Triggered, None).await?;
        Ok(Action::requeue(Duration::from_secs(1)))
    } else {
        Ok(Action::requeue(REQUEUE_INTERVAL))
    }
}

async fn step_triggered(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();
    let now = Utc::now().to_rfc3339();

    let api: Api<AutonomousAction> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({ "status": { "phase": "Reasoning", "lastTriggeredAt": now } });
    api.patch_status(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;

    Ok(Action::requeue(Duration::from_secs(1)))
}

async fn step_reasoning(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();

    let tool_ctx = ToolContext::new(ctx.client.clone()).with_forbidden_namespaces(spec.spec.constraints.forbidden_namespaces.clone());
    let gathered = context::gather(&tool_ctx, &spec.spec.context).await;

    let provider = llm::provider_for(&spec.spec.llm, None)?;
    let prompt = format!("A remediation trigger fired for {namespace}/{name}. Propose one bounded action as JSON matching the ProposedAction schema.");
    let reply = llm::generate_with_context(provider.as_ref(), &prompt, spec.spec.llm.system_prompt.as_deref(), &gathered).await?;

    let proposed = parse_proposed_action(&reply.text, &namespace);
    let reasoning_digest = audit::digest(&proposed.description, MAX_REASONING_CHARS);
    let action_kind = proposed.parameters.as_ref().map(|p| p.kind().to_string());
    let target_namespace = proposed.parameters.as_ref().and_then(|p| p.namespace().map(str::to_string));

    let last_remediated_at_epoch = spec.status.as_ref().and_then(|s| s.last_remediated_at_epoch);
    let decision = ctx.safety.evaluate(
        &spec_key(spec),
        &namespace,
        action_kind.as_deref().unwrap_or(""),
        target_namespace.as_deref(),
        &spec.spec.constraints,
        last_remediated_at_epoch,
        Utc::now().timestamp(),
        spec.spec.approval_mode,
    );

    let api: Api<AutonomousAction> = Api::namespaced(ctx.client.clone(), &namespace);
    let proposed_value = serde_json::to_value(&proposed).unwrap_or(serde_json::Value::Null);

    match decision {
        GateDecision::Rejected(reason) => {
            ACTIONS_REJECTED.with_label_values(&[reason.code()]).inc();

            let entry = AuditEntry {
                timestamp: Utc::now().to_rfc3339(),
                namespace: namespace.clone(),
                name: name.clone(),
                action_kind: action_kind.unwrap_or_default(),
                parameters_digest: audit::digest(&proposed_value.to_string(), 500),
                approved: false,
                dry_run: false,
                result: "rejected".to_string(),
                error: Some(reason.code().to_string()),
                reasoning_digest,
            };
            ctx.audit.push(entry);
            audit::emit_event(
                &ctx.client,
                &namespace,
                &name,
                spec.metadata.uid.as_deref(),
                "Warning",
                audit::REASON_REJECTED,
                &format!("rejected: {}", reason.code()),
            )
            .await;

            // Concrete Scenario 2 (spec.md §8): a rejected proposal returns
            // the spec to Monitoring rather than retrying Reasoning.
            patch_phase(&ctx.client, &namespace, &name, Phase::Monitoring, None).await?;
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        GateDecision::AwaitApproval => {
            let patch = serde_json::json!({
                "status": { "phase": "PendingApproval", "proposedAction": proposed_value, "reasoning": reasoning_digest }
            });
            api.patch_status(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        GateDecision::Execute | GateDecision::ExecuteDryRun => {
            let patch = serde_json::json!({
                "status": { "phase": "Executing", "proposedAction": proposed_value, "reasoning": reasoning_digest }
            });
            api.patch_status(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }
    }
}

async fn step_pending_approval(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();

    let approved = spec.status.as_ref().map(|s| s.is_approved()).unwrap_or(false);
    if approved {
        patch_phase(&ctx.client, &namespace, &name, Phase::Executing, None).await?;
        Ok(Action::requeue(Duration::from_secs(1)))
    } else {
        Ok(Action::requeue(REQUEUE_INTERVAL))
    }
}

async fn step_executing(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();

    let proposed = spec.status.as_ref().and_then(|s| s.proposed_action.as_ref());
    let params = proposed.and_then(|p| p.parameters.as_ref());
    let dry_run = spec.spec.approval_mode == ApprovalMode::DryRun;

    let tool_ctx = ToolContext::new(ctx.client.clone()).with_forbidden_namespaces(spec.spec.constraints.forbidden_namespaces.clone());
    let reasoning = spec.status.as_ref().and_then(|s| s.reasoning.as_deref()).unwrap_or_default();

    let outcome = executor::execute(&ctx.client, &tool_ctx, &namespace, &name, params, true, dry_run, reasoning).await;

    let (result, entry, kind) = match outcome {
        Ok(outcome) => {
            let kind = outcome.entry.action_kind.clone();
            (outcome.result, outcome.entry, kind)
        }
        Err(e) => {
            let kind = params.map(|p| p.kind().to_string()).unwrap_or_default();
            let result = ExecutionResult {
                success: false,
                executed_at: Utc::now().to_rfc3339(),
                output: String::new(),
                duration_seconds: 0.0,
            };
            let entry = AuditEntry {
                timestamp: Utc::now().to_rfc3339(),
                namespace: namespace.clone(),
                name: name.clone(),
                action_kind: kind.clone(),
                parameters_digest: String::new(),
                approved: true,
                dry_run,
                result: "failure".to_string(),
                error: Some(e.to_string()),
                reasoning_digest: audit::digest(reasoning, MAX_REASONING_CHARS),
            };
            (result, entry, kind)
        }
    };

    ACTIONS_EXECUTED.with_label_values(&[&kind, if result.success { "success" } else { "failure" }]).inc();
    ctx.audit.push(entry);

    let event_type = if result.success { "Normal" } else { "Warning" };
    let reason = if result.success { audit::REASON_EXECUTED } else { audit::REASON_FAILED };
    audit::emit_event(
        &ctx.client,
        &namespace,
        &name,
        spec.metadata.uid.as_deref(),
        event_type,
        reason,
        &format!("{kind}: {}", if result.success { "executed" } else { "failed" }),
    )
    .await;

    let next_phase = if result.success { Phase::Completed } else { Phase::Failed };
    let api: Api<AutonomousAction> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut status_patch = serde_json::json!({
        "status": { "phase": format!("{next_phase:?}"), "executionResult": result }
    });
    if result.success {
        status_patch["status"]["lastRemediatedAtEpoch"] = serde_json::json!(Utc::now().timestamp());
        let next_count = spec.status.as_ref().map(|s| s.action_count).unwrap_or(0) + 1;
        status_patch["status"]["actionCount"] = serde_json::json!(next_count);
    }
    api.patch_status(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&status_patch)).await?;

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn step_terminal(spec: &AutonomousAction, ctx: &ReconcileContext) -> anyhow::Result<Action> {
    let namespace = spec.namespace().unwrap_or_default();
    let name = spec.name_any();
    patch_phase(&ctx.client, &namespace, &name, Phase::Monitoring, None).await?;
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/* ============================= HELPERS ============================= */

/// Bounds a reconcile step's external I/O to `RECONCILE_BUDGET`. A step that
/// overruns is reported as `cancelled`, the distinct `execution_error`
/// variant named in spec.md §7, rather than hanging the worker.
async fn with_reconcile_budget(fut: impl std::future::Future<Output = anyhow::Result<Action>>) -> anyhow::Result<Action> {
    with_budget(RECONCILE_BUDGET, fut).await
}

async fn with_budget(budget: Duration, fut: impl std::future::Future<Output = anyhow::Result<Action>>) -> anyhow::Result<Action> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("cancelled: reconcile budget of {}s exceeded", budget.as_secs()),
    }
}

async fn patch_phase(client: &Client, namespace: &str, name: &str, phase: Phase, error_message: Option<String>) -> anyhow::Result<()> {
    let api: Api<AutonomousAction> = Api::namespaced(client.clone(), namespace);
    let mut patch = serde_json::json!({ "status": { "phase": format!("{phase:?}") } });
    if let Some(msg) = error_message {
        patch["status"]["errorMessage"] = serde_json::json!(msg);
    }
    api.patch_status(name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Parses the LLM's raw text as a `ProposedAction`. On failure, falls back
/// to a synthetic `restart` proposal carrying the raw text as its
/// description (§4.4) — deliberately constructed with an empty selector so
/// it is refused downstream by the catalog's `selectors_required` check
/// rather than silently executed.
fn parse_proposed_action(text: &str, namespace: &str) -> ProposedAction {
    serde_json::from_str::<ProposedAction>(text).unwrap_or_else(|_| ProposedAction {
        description: text.to_string(),
        parameters: Some(ActionParameters::Restart {
            namespace: namespace.to_string(),
            selector: BTreeMap::new(),
        }),
        confidence: 0.8,
        risk: RiskLevel::Medium,
    })
}

/* ============================= ERROR POLICY ============================= */

fn error_policy(_spec: Arc<AutonomousAction>, error: &kube::Error, _ctx: Arc<ReconcileContext>) -> Action {
    RECONCILE_ERRORS.inc();
    warn!(error = %error, "reconcile_error");
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}

/* ============================= FINALIZER ============================= */

fn has_finalizer(spec: &AutonomousAction) -> bool {
    spec.metadata.finalizers.as_ref().is_some_and(|f| f.iter().any(|s| s == FINALIZER))
}

async fn add_finalizer(spec: &AutonomousAction, client: &Client) -> std::result::Result<(), kube::Error> {
    let name = spec.name_any();
    let namespace = spec.namespace().unwrap_or_default();
    let api: Api<AutonomousAction> = Api::namespaced(client.clone(), &namespace);
    let patch = serde_json::json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;
    info!(spec = %name, "finalizer_added");
    Ok(())
}

async fn remove_finalizer(spec: &AutonomousAction, client: &Client) -> std::result::Result<(), kube::Error> {
    let name = spec.name_any();
    let namespace = spec.namespace().unwrap_or_default();
    let api: Api<AutonomousAction> = Api::namespaced(client.clone(), &namespace);
    let patch = serde_json::json!({ "metadata": { "finalizers": [] } });
    api.patch(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch)).await?;
    info!(spec = %name, "finalizer_removed");
    Ok(())
}

async fn handle_deletion(spec: &AutonomousAction, client: &Client) -> std::result::Result<Action, kube::Error> {
    let name = spec.name_any();
    let namespace = spec.namespace().unwrap_or_default();
    info!(spec = %name, namespace = %namespace, "handling_deletion");

    if has_finalizer(spec) {
        remove_finalizer(spec, client).await?;
    }
    Ok(Action::await_change())
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_reconcile_router(state: Arc<Mutex<ReconcileState>>) -> axum::Router {
    axum::Router::new()
        .route("/metrics", get(reconcile_metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || reconcile_ready_handler(state.clone())
            }),
        )
}

/// Binds the metrics endpoint on `metrics_addr` and the health/readiness
/// endpoints on `health_addr` (kubebuilder convention splits these across
/// `--metrics-bind-address` / `--health-probe-bind-address`, §6). Both
/// listeners serve the same router since the handlers are cheap and
/// idempotent; only the bind address differs.
async fn start_metrics_server(
    state: Arc<Mutex<ReconcileState>>,
    mut shutdown: broadcast::Receiver<()>,
    metrics_addr: SocketAddr,
    health_addr: SocketAddr,
) -> Result<()> {
    let metrics_app = build_reconcile_router(state.clone());
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .context("Failed to bind metrics server")?;
    info!(addr = %metrics_addr, "reconcile_metrics_server_started");

    let health_shutdown = shutdown.resubscribe();
    let health_app = build_reconcile_router(state);
    let health_handle = if health_addr != metrics_addr {
        let health_listener = tokio::net::TcpListener::bind(health_addr)
            .await
            .context("Failed to bind health probe server")?;
        info!(addr = %health_addr, "reconcile_health_server_started");
        Some(tokio::spawn(async move {
            let mut shutdown = health_shutdown;
            let _ = axum::serve(health_listener, health_app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await;
        }))
    } else {
        None
    };

    axum::serve(metrics_listener, metrics_app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn reconcile_ready_handler(state: Arc<Mutex<ReconcileState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn reconcile_metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

/* ============================= LEADER ELECTION ============================= */

/// Best-effort leader election over a `coordination.k8s.io/v1` Lease,
/// gated by `--leader-elect` (§6). A single acquire-or-yield attempt at
/// startup, not a continuously-renewed lock: good enough to keep two
/// freshly-rolled replicas from double-reconciling during a deploy, but not
/// a substitute for a real distributed lock if the holder wedges mid-run.
/// Extending this to periodic renewal is future work, same spirit as the
/// rate-limit-bucket persistence note in spec.md §9.
mod leader {
    use std::sync::LazyLock;

    use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::Client;

    const LEASE_NAME: &str = "prophet-remediation-engine-leader";
    const LEASE_NAMESPACE: &str = "default";
    const LEASE_DURATION_SECONDS: i32 = 30;

    pub static IDENTITY: LazyLock<String> = LazyLock::new(|| format!("pid-{}", std::process::id()));

    pub async fn acquire(client: &Client) -> anyhow::Result<bool> {
        let leases: Api<Lease> = Api::namespaced(client.clone(), LEASE_NAMESPACE);
        let now = chrono::Utc::now();

        let desired = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(LEASE_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(IDENTITY.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                ..Default::default()
            }),
        };

        match leases.create(&PostParams::default(), &desired).await {
            Ok(_) => return Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        let existing = leases.get(LEASE_NAME).await?;
        let Some(spec) = existing.spec else {
            return Ok(false);
        };

        let held_by_us = spec.holder_identity.as_deref() == Some(IDENTITY.as_str());
        let stale = spec
            .renew_time
            .map(|t| now.signed_duration_since(t.0) > chrono::Duration::seconds(LEASE_DURATION_SECONDS as i64))
            .unwrap_or(true);

        if held_by_us {
            return Ok(true);
        }
        if !stale {
            return Ok(false);
        }

        let patch = serde_json::json!({
            "spec": {
                "holderIdentity": IDENTITY.as_str(),
                "leaseDurationSeconds": LEASE_DURATION_SECONDS,
                "acquireTime": now.to_rfc3339(),
                "renewTime": now.to_rfc3339(),
            }
        });
        leases
            .patch(LEASE_NAME, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(ready: bool) -> Arc<Mutex<ReconcileState>> {
        Arc::new(Mutex::new(ReconcileState { ready }))
    }

    #[tokio::test]
    async fn test_with_budget_times_out_as_cancelled() {
        let fut = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Action::requeue(Duration::from_secs(1)))
        };
        let err = with_budget(Duration::from_millis(5), fut).await.unwrap_err();
        assert!(err.to_string().starts_with("cancelled:"));
    }

    #[tokio::test]
    async fn test_with_budget_passes_through_fast_result() {
        let fut = async { Ok(Action::requeue(Duration::from_secs(1))) };
        assert!(with_budget(Duration::from_secs(5), fut).await.is_ok());
    }

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let app = build_reconcile_router(test_state(false));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_not_ready_until_first_reconcile() {
        let app = build_reconcile_router(test_state(false));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_ready() {
        let app = build_reconcile_router(test_state(true));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"READY");
    }

    #[test]
    fn test_parse_proposed_action_valid_json() {
        let text = r#"{"description":"scale up","parameters":{"kind":"scale","namespace":"default","deployment":"api","replicas":5},"confidence":0.9,"risk":"high"}"#;
        let proposed = parse_proposed_action(text, "default");
        assert_eq!(proposed.description, "scale up");
        assert_eq!(proposed.risk, RiskLevel::High);
        assert!(matches!(proposed.parameters, Some(ActionParameters::Scale { .. })));
    }

    #[test]
    fn test_parse_proposed_action_falls_back_on_garbage() {
        let proposed = parse_proposed_action("not json at all", "default");
        assert_eq!(proposed.description, "not json at all");
        assert_eq!(proposed.confidence, 0.8);
        assert_eq!(proposed.risk, RiskLevel::Medium);
        match proposed.parameters {
            Some(ActionParameters::Restart { namespace, selector }) => {
                assert_eq!(namespace, "default");
                assert!(selector.is_empty());
            }
            other => panic!("expected synthetic restart fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_key_guard_prevents_concurrent_acquire() {
        let set: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let first = KeyGuard::try_acquire(set.clone(), "default/spec-a".to_string()).await;
        assert!(first.is_some());

        let second = KeyGuard::try_acquire(set.clone(), "default/spec-a".to_string()).await;
        assert!(second.is_none());

        drop(first);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let third = KeyGuard::try_acquire(set.clone(), "default/spec-a".to_string()).await;
        assert!(third.is_some());
    }
}
