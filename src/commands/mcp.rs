//! MCP server entry point (§4.2, §6): a plain HTTP listener and an
//! optional TLS listener exposing the same router, both backed by the
//! catalog and the shared Safety Gate.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig as RustlsServerConfig};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::catalog::{self, ToolContext};
use crate::config::DEFAULT_SNAPSHOT_CADENCE;
use crate::crd::{AutonomousAction, ConstraintsSpec};
use crate::mcp::{self, RpcRequest, RpcResponse};
use crate::safety::SafetyGate;

/* ============================= PROMETHEUS ============================= */

static MCP_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static MCP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("mcp_requests_total", "Total MCP RPC requests by method"),
        &["method", "outcome"],
    )
    .expect("metric definition is valid");
    MCP_REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/* ============================= STATE ============================= */

#[derive(Clone)]
pub(crate) struct McpState {
    client: Client,
    tool_ctx: ToolContext,
    safety: Arc<SafetyGate>,
}

/* ============================= ENTRY: SERVE ============================= */

#[allow(clippy::too_many_arguments)]
pub async fn serve(
    bind_addr: &str,
    tls_enabled: bool,
    tls_port: u16,
    tls_cert_file: &str,
    tls_key_file: &str,
    tls_client_ca_file: Option<&str>,
) -> Result<()> {
    println!("Starting MCP server...\n");
    info!("mcp_server_starting");

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster")?;

    let state = McpState {
        tool_ctx: ToolContext::new(client.clone()),
        client,
        safety: Arc::new(SafetyGate::default()),
    };

    let addr: SocketAddr = bind_addr.parse().context("Invalid MCP bind address")?;

    println!("  Plain listener ............... http://{addr}");
    if tls_enabled {
        println!("  TLS listener ................. https://0.0.0.0:{tls_port}");
        if let Some(ca) = tls_client_ca_file {
            println!("  Mutual TLS client CA ........ {ca}");
        }
    }
    println!();
    println!("  Endpoints:");
    println!("    POST /rpc .................. initialize / tools/list / tools/call");
    println!("    GET  /stream ............... streaming cluster-state snapshots");
    println!("    POST /approve/:ns/:name .... sets the Approved condition");
    println!("    GET  /healthz / /readyz / /metrics");
    println!();
    println!("MCP server running. Press Ctrl+C to stop.\n");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let plain_state = state.clone();
    let plain_shutdown = shutdown_tx.subscribe();
    let plain_handle = tokio::spawn(async move {
        start_plain_server(plain_state, plain_shutdown, addr).await
    });

    let tls_handle = if tls_enabled {
        let tls_addr: SocketAddr = format!("0.0.0.0:{tls_port}").parse()?;
        let tls_state = state.clone();
        let tls_shutdown = shutdown_tx.subscribe();
        let cert = tls_cert_file.to_string();
        let key = tls_key_file.to_string();
        let client_ca = tls_client_ca_file.map(|s| s.to_string());
        Some(tokio::spawn(async move {
            start_tls_server(tls_state, tls_shutdown, tls_addr, &cert, &key, client_ca.as_deref()).await
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\nShutdown signal received. Draining MCP server...");

    let _ = shutdown_tx.send(());
    let _ = plain_handle.await?;
    if let Some(handle) = tls_handle {
        let _ = handle.await?;
    }

    info!("mcp_server_stopped");
    println!("MCP server stopped.");
    Ok(())
}

/* ============================= ROUTER ============================= */

pub(crate) fn build_router(state: McpState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/stream", get(stream_handler))
        .route("/approve/:namespace/:name", post(approve_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "READY") }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn start_plain_server(state: McpState, mut shutdown: broadcast::Receiver<()>, addr: SocketAddr) -> Result<()> {
    let app = build_router(state);
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    axum_server::bind(addr).handle(handle).serve(app.into_make_service()).await?;
    Ok(())
}

/// Loads a PEM cert chain from disk.
fn load_certs(path: &FsPath) -> Result<Vec<CertificateDer<'static>>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(f);
    let certs = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .map(|c| c.into_owned())
        .collect::<Vec<_>>();
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

/// Loads a single PEM private key from disk.
fn load_private_key(path: &FsPath) -> Result<PrivateKeyDer<'static>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(f);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("reading private key from {}", path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}

/// Builds the rustls server config for the MCP TLS listener. When
/// `client_ca` is set, client certificates signed by that CA bundle are
/// required (mutual TLS per §6); otherwise any client may connect.
fn build_tls_config(tls_cert: &str, tls_key: &str, client_ca: Option<&str>) -> Result<RustlsServerConfig> {
    let certs = load_certs(FsPath::new(tls_cert))?;
    let key = load_private_key(FsPath::new(tls_key))?;

    let builder = RustlsServerConfig::builder();
    let config = match client_ca {
        Some(ca_path) => {
            let ca_certs = load_certs(FsPath::new(ca_path))?;
            let mut client_ca_store = RootCertStore::empty();
            for cert in ca_certs {
                client_ca_store
                    .add(cert)
                    .map_err(|e| anyhow::anyhow!("adding client CA cert: {e}"))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(client_ca_store))
                .build()
                .map_err(|e| anyhow::anyhow!("building client cert verifier: {e}"))?;
            info!(ca = ca_path, "mcp_mutual_tls_enabled");
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    config
        .with_single_cert(certs, key)
        .context("Failed to build MCP TLS configuration")
}

#[allow(clippy::too_many_arguments)]
async fn start_tls_server(
    state: McpState,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
    tls_cert: &str,
    tls_key: &str,
    client_ca: Option<&str>,
) -> Result<()> {
    let app = build_router(state);

    let server_config = build_tls_config(tls_cert, tls_key, client_ca)?;
    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config));

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

/* ============================= HANDLERS ============================= */

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = MCP_REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer).and_then(|_| {
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }) {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

async fn stream_handler(ws: WebSocketUpgrade, State(state): State<McpState>) -> Response {
    ws.on_upgrade(move |socket| stream_socket(socket, state))
}

/// Drives one `/stream` client: a periodic cluster-state snapshot every
/// `DEFAULT_SNAPSHOT_CADENCE` until the client disconnects.
async fn stream_socket(mut socket: WebSocket, state: McpState) {
    let mut ticker = tokio::time::interval(DEFAULT_SNAPSHOT_CADENCE);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = cluster_snapshot(&state).await;
                if socket.send(Message::Text(snapshot.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// A read-only cluster snapshot built from the same catalog tools `tools/call`
/// dispatches, so `/stream` and `/rpc` never disagree about cluster state.
async fn cluster_snapshot(state: &McpState) -> Value {
    let nodes = match catalog::dispatch(&state.tool_ctx, "k8s_get_nodes", json!({})).await {
        Ok(v) => v,
        Err(e) => json!({ "error": e.to_string() }),
    };

    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "cadence_seconds": DEFAULT_SNAPSHOT_CADENCE.as_secs(),
        "nodes": nodes,
    })
}

async fn approve_handler(
    State(state): State<McpState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let api: Api<AutonomousAction> = Api::namespaced(state.client.clone(), &namespace);
    let patch = json!({ "status": { "approved": true } });

    match api
        .patch_status(&name, &PatchParams::apply("prophet-remediation-engine"), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            info!(namespace, name, "approval_bit_set");
            (StatusCode::OK, json!({ "approved": true }).to_string())
        }
        Err(e) => {
            warn!(namespace, name, error = %e, "approval_patch_failed");
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }).to_string())
        }
    }
}

async fn rpc_handler(State(state): State<McpState>, body: String) -> impl IntoResponse {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return axum::Json(RpcResponse::invalid_params(Value::Null, e.to_string()));
        }
    };

    let response = match request.method.as_str() {
        "initialize" => {
            MCP_REQUESTS.with_label_values(&["initialize", "ok"]).inc();
            let result = mcp::initialize_result();
            RpcResponse::ok(request.id, serde_json::to_value(result).unwrap_or(Value::Null))
        }
        "tools/list" => {
            MCP_REQUESTS.with_label_values(&["tools/list", "ok"]).inc();
            let tools = catalog::catalog();
            RpcResponse::ok(request.id, json!({ "tools": tools }))
        }
        "tools/call" => handle_tools_call(&state, request).await,
        other => {
            MCP_REQUESTS.with_label_values(&[other, "method_not_found"]).inc();
            RpcResponse::method_not_found(request.id, other)
        }
    };

    axum::Json(response)
}

async fn handle_tools_call(state: &McpState, request: RpcRequest) -> RpcResponse {
    let Some(tool_name) = request.params.get("name").and_then(Value::as_str) else {
        return RpcResponse::invalid_params(request.id, "missing required field 'name'");
    };
    let arguments = request.params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    if !catalog::is_read_only(tool_name) {
        let action_kind = catalog::ACTION_KINDS
            .iter()
            .find(|k| tool_name.contains(*k))
            .copied()
            .unwrap_or("");
        let target_namespace = arguments.get("namespace").and_then(Value::as_str);
        let connection_key = "mcp:anonymous";
        let decision = state.safety.evaluate_external(
            connection_key,
            action_kind,
            target_namespace,
            &ConstraintsSpec::default(),
        );
        if let crate::safety::GateDecision::Rejected(reason) = decision {
            MCP_REQUESTS.with_label_values(&["tools/call", reason.code()]).inc();
            return RpcResponse::ok(
                request.id,
                json!({ "content": [{ "type": "text", "text": format!("rejected: {}", reason.code()) }] }),
            );
        }
    }

    match catalog::dispatch(&state.tool_ctx, tool_name, arguments).await {
        Ok(value) => {
            MCP_REQUESTS.with_label_values(&["tools/call", "ok"]).inc();
            RpcResponse::ok(
                request.id,
                json!({ "content": [{ "type": "text", "text": value.to_string() }] }),
            )
        }
        Err(e) => {
            MCP_REQUESTS.with_label_values(&["tools/call", "error"]).inc();
            RpcResponse::internal_error(request.id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_client() -> Client {
        Client::try_from(kube::Config::new("https://127.0.0.1:1".parse().unwrap()))
            .expect("client construction from static config never calls the network")
    }

    fn test_state() -> McpState {
        let client = test_client();
        McpState {
            tool_ctx: ToolContext::new(client.clone()),
            client,
            safety: Arc::new(SafetyGate::default()),
        }
    }

    #[tokio::test]
    async fn test_tools_list_is_pure() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"id":1,"method":"tools/list"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let tools = body["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), catalog::catalog().len());
    }

    #[tokio::test]
    async fn test_unknown_method_returns_reserved_error_code() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"id":1,"method":"bogus/method"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], json!(mcp::ERROR_METHOD_NOT_FOUND));
    }

    #[test]
    fn test_build_tls_config_rejects_missing_cert_file() {
        let err = build_tls_config("/nonexistent/mcp-cert.pem", "/nonexistent/mcp-key.pem", None).unwrap_err();
        assert!(err.to_string().contains("mcp-cert.pem"));
    }

    #[test]
    fn test_build_tls_config_rejects_missing_client_ca_file() {
        // Even with a CA bundle configured, a missing server cert is still
        // the first failure surfaced — the CA bundle is only read once the
        // server identity loads successfully.
        let err = build_tls_config("/nonexistent/mcp-cert.pem", "/nonexistent/mcp-key.pem", Some("/nonexistent/ca.pem"))
            .unwrap_err();
        assert!(err.to_string().contains("mcp-cert.pem"));
    }

    #[tokio::test]
    async fn test_healthz_ok() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tools_call_rejects_restart_with_empty_selector() {
        let app = build_router(test_state());
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                r#"{"id":1,"method":"tools/call","params":{"name":"k8s_restart_pods","arguments":{"namespace":"default","selector":{}}}}"#,
            ))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        // Safety gate passes (no allowed_actions restriction by default); the
        // handler itself refuses the empty selector and surfaces as an
        // internal_error result rather than a panic.
        assert!(body.get("error").is_some() || body["result"]["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .contains("selectors"));
    }
}
