use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope. `body` is omitted when there is none.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Arguments of the `attach` request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    pub conn_id: String,
    #[serde(default)]
    pub terminal_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct Source {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourceBreakpointArgument {
    pub line: u32,
    pub column: Option<u32>,
    pub condition: Option<String>,
}

/// Arguments of the `setBreakpoints` request.
#[derive(Debug, Deserialize)]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpointArgument>,
}
