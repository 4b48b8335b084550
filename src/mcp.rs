//! MCP wire types (§4.2): the JSON-RPC-shaped envelopes the embedded MCP
//! server speaks, independent of the HTTP transport in `commands::mcp`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERROR_INVALID_PARAMS: i64 = -32602;
pub const ERROR_INTERNAL: i64 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message: message.into() }),
        }
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        RpcResponse::err(id, ERROR_METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(id: Value, detail: impl Into<String>) -> Self {
        RpcResponse::err(id, ERROR_INVALID_PARAMS, detail.into())
    }

    pub fn internal_error(id: Value, detail: impl Into<String>) -> Self {
        RpcResponse::err(id, ERROR_INTERNAL, detail.into())
    }
}

/// Declared server capabilities, per the `initialize` result (§4.2). Only
/// `tools` is populated — this server exposes no prompts/resources surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// `initialize` result payload: protocol version, server identity, and
/// declared capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    pub capabilities: ServerCapabilities,
}

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        server_name: "prophet-remediation-engine".to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability { list_changed: false },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_request_defaults_jsonrpc_version() {
        let raw = r#"{"id":1,"method":"tools/list"}"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.method, "tools/list");
    }

    #[test]
    fn test_error_codes_match_json_rpc_reserved_range() {
        assert_eq!(ERROR_METHOD_NOT_FOUND, -32601);
        assert_eq!(ERROR_INVALID_PARAMS, -32602);
        assert_eq!(ERROR_INTERNAL, -32603);
    }

    #[test]
    fn test_ok_response_has_no_error_field() {
        let resp = RpcResponse::ok(Value::from(1), serde_json::json!({"a": 1}));
        let serialized = serde_json::to_value(&resp).unwrap();
        assert!(serialized.get("error").is_none());
    }

    #[test]
    fn test_method_not_found_uses_reserved_code() {
        let resp = RpcResponse::method_not_found(Value::from(1), "bogus/call");
        assert_eq!(resp.error.unwrap().code, ERROR_METHOD_NOT_FOUND);
    }

    #[test]
    fn test_initialize_result_reports_server_identity() {
        let result = initialize_result();
        assert_eq!(result.server_name, "prophet-remediation-engine");
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert!(!result.capabilities.tools.list_changed);
    }
}
