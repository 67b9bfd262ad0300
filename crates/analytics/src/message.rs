//! JSON-RPC message classification.
//!
//! Messages cross the transport boundary as raw JSON. They are classified
//! exactly once, at that boundary, into the four JSON-RPC shapes; everything
//! downstream routes on the tag.

use serde_json::Value;

/// Borrowed view over a classified JSON-RPC message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsonRpcMessage<'a> {
    Request {
        id: &'a Value,
        method: &'a str,
        params: Option<&'a Value>,
    },
    Notification {
        method: &'a str,
        params: Option<&'a Value>,
    },
    /// Result-bearing response.
    Response { id: &'a Value, result: &'a Value },
    /// Error-bearing response.
    Error { id: &'a Value, error: &'a Value },
    /// Not a recognizable JSON-RPC shape; passed through untouched.
    Other,
}

impl<'a> JsonRpcMessage<'a> {
    /// Classify a raw message by its fields.
    pub fn classify(message: &'a Value) -> Self {
        let id = message.get("id");
        let method = message.get("method").and_then(Value::as_str);
        let params = message.get("params");

        match (id, method) {
            (Some(id), Some(method)) => JsonRpcMessage::Request { id, method, params },
            (None, Some(method)) => JsonRpcMessage::Notification { method, params },
            (Some(id), None) => {
                if let Some(result) = message.get("result") {
                    JsonRpcMessage::Response { id, result }
                } else if let Some(error) = message.get("error") {
                    JsonRpcMessage::Error { id, error }
                } else {
                    JsonRpcMessage::Other
                }
            }
            (None, None) => JsonRpcMessage::Other,
        }
    }

    /// Shared id accessor across the tagged shapes.
    pub fn id(&self) -> Option<&'a Value> {
        match self {
            JsonRpcMessage::Request { id, .. }
            | JsonRpcMessage::Response { id, .. }
            | JsonRpcMessage::Error { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Stable map key for a JSON-RPC id (number or string).
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Extract `(name, arguments)` from a `tools/call` request's params.
pub fn tool_call_params(params: Option<&Value>) -> Option<(&str, Option<&Value>)> {
    let params = params?;
    let name = params.get("name")?.as_str()?;
    Some((name, params.get("arguments")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_the_four_shapes() {
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {}});
        assert!(matches!(
            JsonRpcMessage::classify(&request),
            JsonRpcMessage::Request { method: "tools/call", .. }
        ));

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
        assert!(matches!(
            JsonRpcMessage::classify(&notification),
            JsonRpcMessage::Notification { .. }
        ));

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        assert!(matches!(
            JsonRpcMessage::classify(&response),
            JsonRpcMessage::Response { .. }
        ));

        let error = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "x"}});
        assert!(matches!(
            JsonRpcMessage::classify(&error),
            JsonRpcMessage::Error { .. }
        ));
    }

    #[test]
    fn ids_match_across_string_and_number_forms() {
        let a = json!(7);
        let b = json!("7");
        assert_ne!(id_key(&a), id_key(&b));
        assert_eq!(id_key(&a), id_key(&json!(7)));
    }

    #[test]
    fn extracts_tool_call_params() {
        let params = json!({"name": "search", "arguments": {"q": "x"}});
        let (name, args) = tool_call_params(Some(&params)).expect("params");
        assert_eq!(name, "search");
        assert_eq!(args.unwrap()["q"], "x");

        assert!(tool_call_params(None).is_none());
        assert!(tool_call_params(Some(&json!({}))).is_none());
    }
}
