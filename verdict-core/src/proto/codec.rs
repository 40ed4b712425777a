//! JSON-RPC 2.0 wire codec
//!
//! Pure functions over single NDJSON lines. Encoding is compact (one object
//! per line, no pretty-printing) because the engine frames messages by
//! newline. Decoding is strict: an empty line, invalid JSON, or a version
//! other than "2.0" is a [`VerdictError::MalformedMessage`]; a response
//! carrying an `error` member becomes [`VerdictError::Protocol`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VerdictError};
use crate::proto::types::RpcError;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// A successfully decoded response envelope. The `error` member is consumed
/// by [`decode_response`]; a value of this type always represents success at
/// the envelope level.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Encode one request as a compact JSON line terminated by `\n`.
pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<Vec<u8>> {
    let request = RpcRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    };
    let mut bytes = serde_json::to_vec(&request)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode exactly one response line.
///
/// Fails with `MalformedMessage` when the line is empty, not valid JSON, or
/// not JSON-RPC 2.0, and with `Protocol` when the engine answered with an
/// error object. Note that `Protocol` failures do not expose the request id;
/// readers that need it should fall back to [`recover_request_id`].
pub fn decode_response(line: &str) -> Result<RpcResponse> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(VerdictError::MalformedMessage(
            "empty response line".to_string(),
        ));
    }

    let response: RpcResponse = serde_json::from_str(trimmed)
        .map_err(|e| VerdictError::MalformedMessage(format!("malformed JSON: {}", e)))?;

    if response.jsonrpc != JSONRPC_VERSION {
        return Err(VerdictError::MalformedMessage(format!(
            "invalid jsonrpc version: {:?}",
            response.jsonrpc
        )));
    }

    if let Some(RpcError {
        code,
        message,
        data,
    }) = response.error
    {
        return Err(VerdictError::Protocol {
            code,
            message,
            data,
        });
    }

    Ok(response)
}

/// Request id of a decoded response. Total: decoding already rejected
/// envelopes without an id.
pub fn extract_id(response: &RpcResponse) -> u64 {
    response.id
}

/// Take the `result` member out of a decoded response.
pub fn extract_result(response: RpcResponse) -> Result<Value> {
    response
        .result
        .ok_or(VerdictError::MissingField("result"))
}

/// Best-effort recovery of the request id from a raw line.
///
/// Used by the reader loop to route a decode failure (typically a `Protocol`
/// error) to the specific pending caller it belongs to.
pub fn recover_request_id(line: &str) -> Option<u64> {
    let raw: Value = serde_json::from_str(line.trim()).ok()?;
    raw.get("id")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_format() {
        let bytes = encode_request(1, "initialize", &json!({"sdk_name": "test"})).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "initialize");
        assert_eq!(parsed["params"]["sdk_name"], "test");
    }

    #[test]
    fn test_encode_request_is_one_line() {
        let bytes = encode_request(1, "evaluate_batch", &json!({"trace": {"a": [1, 2]}})).unwrap();
        let line = &bytes[..bytes.len() - 1];
        assert!(!line.contains(&b'\n'));
    }

    #[test]
    fn test_decode_response_success() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":{"engine_version":"0.3.1"}}"#;
        let response = decode_response(line).unwrap();
        assert_eq!(response.id, 1);
        assert_eq!(
            response.result.unwrap()["engine_version"],
            json!("0.3.1")
        );
    }

    #[test]
    fn test_decode_response_error_member() {
        let line = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": 3003,
                "message": "session error",
                "data": {
                    "error_type": "SESSION_ERROR",
                    "retryable": false,
                    "detail": "Call initialize first"
                }
            }
        })
        .to_string();

        match decode_response(&line) {
            Err(VerdictError::Protocol { code, data, .. }) => {
                assert_eq!(code, 3003);
                assert_eq!(data.unwrap().error_type, "SESSION_ERROR");
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_response_malformed_json() {
        assert!(matches!(
            decode_response("not json"),
            Err(VerdictError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_response_empty_line() {
        assert!(matches!(
            decode_response("\n"),
            Err(VerdictError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_response_wrong_version() {
        assert!(matches!(
            decode_response(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#),
            Err(VerdictError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_extract_result_missing() {
        let response = decode_response(r#"{"jsonrpc":"2.0","id":7}"#).unwrap();
        assert_eq!(extract_id(&response), 7);
        assert!(matches!(
            extract_result(response),
            Err(VerdictError::MissingField("result"))
        ));
    }

    #[test]
    fn test_round_trip_preserves_id_method_params() {
        let params = json!({"trace": {"trace_id": "trc_1"}, "assertions": []});
        let bytes = encode_request(42, "evaluate_batch", &params).unwrap();
        let line = String::from_utf8(bytes).unwrap();
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["id"], 42);
        assert_eq!(parsed["method"], "evaluate_batch");
        assert_eq!(parsed["params"], params);
    }

    #[test]
    fn test_recover_request_id() {
        let line = r#"{"jsonrpc":"2.0","id":9,"error":{"code":1001,"message":"bad trace"}}"#;
        assert_eq!(recover_request_id(line), Some(9));
        assert_eq!(recover_request_id("garbage"), None);
        assert_eq!(recover_request_id(r#"{"jsonrpc":"2.0"}"#), None);
    }
}
