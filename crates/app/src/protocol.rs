use runner::{ExecutionRequest, ExecutionResult};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON format";

const INPUT_RESPONSE_TYPE: &str = "input_response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Execute,
    /// Reserved for mid-run interactive input; accepted and ignored.
    InputResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub kind: RequestKind,
    pub request: ExecutionRequest,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

/// Decodes one inbound frame. Anything other than a JSON object with string
/// (or null) fields is a protocol error.
pub fn decode_request(payload: &str) -> Result<InboundRequest, ProtocolError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|err| ProtocolError(err.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError("request must be a JSON object".to_owned()));
    }
    let wire: WireRequest =
        serde_json::from_value(value).map_err(|err| ProtocolError(err.to_string()))?;
    let kind = match wire.kind.as_deref() {
        Some(INPUT_RESPONSE_TYPE) => RequestKind::InputResponse,
        _ => RequestKind::Execute,
    };
    Ok(InboundRequest {
        kind,
        request: ExecutionRequest {
            code: wire.code.unwrap_or_default(),
            input: wire.input.unwrap_or_default(),
        },
    })
}

pub fn invalid_json_result() -> ExecutionResult {
    ExecutionResult::failure(INVALID_JSON_MESSAGE)
}

pub fn encode_result(result: &ExecutionResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|err| {
        log::error!("failed to encode result: {err}");
        r#"{"status":"error","output":"","error":"Executor error: failed to encode result"}"#
            .to_owned()
    })
}
