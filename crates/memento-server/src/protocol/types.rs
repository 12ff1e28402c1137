//! JSON-RPC 2.0 types.
//!
//! Responses carry either `result` or `error`, never both; the constructors
//! make the invalid state unrepresentable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// REQUEST/RESPONSE
// ============================================================================

/// JSON-RPC Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request without an id is a notification; it gets no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// JSON-RPC error codes (standard + server-specific)
#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,

    // Server-specific (-32000 to -32099)
    NotFound = -32002,
    CircuitOpen = -32003,
    BoundsExceeded = -32004,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

/// JSON-RPC Error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code: code.into(),
            message: message.to_string(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            &format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Translate a core error, preserving its taxonomy kind in `data`.
    pub fn from_core(err: &memento_core::Error) -> Self {
        use memento_core::ErrorKind;
        let (code, kind) = match err.kind() {
            ErrorKind::InvalidInput => (ErrorCode::InvalidParams, "invalid-input"),
            ErrorKind::NotFound => (ErrorCode::NotFound, "not-found"),
            ErrorKind::GraphBoundsExceeded => (ErrorCode::BoundsExceeded, "graph-bounds-exceeded"),
            ErrorKind::CircuitOpen => (ErrorCode::CircuitOpen, "circuit-open"),
            ErrorKind::DeadlineExceeded => (ErrorCode::InternalError, "deadline-exceeded"),
            ErrorKind::Cancelled => (ErrorCode::InternalError, "cancelled"),
            ErrorKind::Transient => (ErrorCode::InternalError, "transient"),
            ErrorKind::Integrity => (ErrorCode::InternalError, "integrity"),
        };
        Self {
            code: code.into(),
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": kind })),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::Number(1.into())),
            method: "store_memory".to_string(),
            params: Some(serde_json::json!({"content": "x"})),
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "store_memory");
        assert!(!parsed.is_notification());
    }

    #[test]
    fn response_carries_result_xor_error() {
        let ok = JsonRpcResponse::success(Some(Value::from(1)), serde_json::json!({"ok": true}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let err = JsonRpcResponse::error(Some(Value::from(1)), JsonRpcError::parse_error());
        assert!(err.result.is_none() && err.error.is_some());
        assert_eq!(err.error.unwrap().code, -32700);
    }

    #[test]
    fn core_errors_keep_their_kind() {
        let err = JsonRpcError::from_core(&memento_core::Error::NotFound("mem:x:1".into()));
        assert_eq!(err.code, -32002);
        assert_eq!(err.data.unwrap()["kind"], "not-found");

        let err = JsonRpcError::from_core(&memento_core::Error::CircuitOpen);
        assert_eq!(err.data.unwrap()["kind"], "circuit-open");
    }
}
