//! JSON-RPC 2.0 message types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` when the member is absent; an explicit `null` is `Some(Null)`
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    /// A request without an id member expects no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
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

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method.into()),
            data: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

/// Parse one input line. Invalid JSON is a parse error; valid JSON that is
/// not a request is an invalid request.
pub fn parse_request(line: &str) -> Result<JsonRpcRequest, JsonRpcError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| JsonRpcError::parse_error(format!("Parse error: {}", e)))?;
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| JsonRpcError::invalid_request(format!("Invalid request: {}", e)))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcError::invalid_request(format!(
            "Unsupported jsonrpc version: {}",
            request.jsonrpc
        )));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_serialization() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"status": "ok"}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_error_response_keeps_null_id() {
        let response = JsonRpcResponse::error(None, JsonRpcError::parse_error("bad"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
    }

    #[test]
    fn test_parse_request() {
        let request =
            parse_request(r#"{"jsonrpc":"2.0","id":7,"method":"search","params":{"text":"hej"}}"#)
                .unwrap();
        assert_eq!(request.method, "search");
        assert_eq!(request.id, Some(json!(7)));
        assert!(!request.is_notification());

        let notification = parse_request(r#"{"jsonrpc":"2.0","method":"health"}"#).unwrap();
        assert!(notification.is_notification());

        let null_id = parse_request(r#"{"jsonrpc":"2.0","id":null,"method":"health"}"#).unwrap();
        assert_eq!(null_id.id, Some(Value::Null));
        assert!(!null_id.is_notification());
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse_request("{not json").unwrap_err().code, -32700);
        assert_eq!(parse_request(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err().code, -32600);
        assert_eq!(
            parse_request(r#"{"jsonrpc":"1.0","id":1,"method":"health"}"#)
                .unwrap_err()
                .code,
            -32600
        );
    }
}
