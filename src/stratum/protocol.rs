//! Stratum JSON-RPC message envelopes and error codes
//!
//! One request/response/notification per newline-delimited line. The error
//! codes are part of the client-facing protocol and must not change value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed JSON-RPC version string used in responses and notifications
pub const JSONRPC_VERSION: &str = "2.0";

/// Generic client request: `{id, method, params}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Message id from the client; replies echo it back
    #[serde(default)]
    pub id: Option<Value>,
    /// Protocol method name
    pub method: String,
    /// Parameters, per coin definition
    #[serde(default)]
    pub params: Value,
}

/// Generic server response: `{id, jsonrpc, result, error}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Message id; matches the initiating request
    #[serde(default)]
    pub id: Option<Value>,
    /// Fixed version number
    pub jsonrpc: String,
    /// Result value, per coin definition
    #[serde(default)]
    pub result: Value,
    /// Error reply, `null` on success
    #[serde(default)]
    pub error: Option<ErrorReply>,
}

impl RpcResponse {
    /// Build a success response around an already-serialized result
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            error: None,
        }
    }

    /// Build an error response
    pub fn error(id: Option<Value>, error: StratumError) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Value::Null,
            error: Some(error.reply()),
        }
    }
}

/// Server response that omits the error field when empty
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponseOmitError {
    /// Message id; matches the initiating request
    pub id: Option<Value>,
    /// Fixed version number
    pub jsonrpc: String,
    /// Result value, per coin definition
    pub result: Value,
    /// Error reply, omitted when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
}

/// Server-initiated notification: `{jsonrpc, method, params}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    /// Fixed version number
    pub jsonrpc: String,
    /// Protocol method name
    pub method: String,
    /// Parameters, per coin definition
    pub params: Value,
}

impl RpcNotification {
    /// Build a notification
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Standard stratum error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Numeric error code, stable across releases
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

/// Stratum error codes
///
/// Codes 19-26 are defined by the stratum protocol, 28-34 are custom
/// malformed-field variants, 40 flags repeated authorization. DO NOT change
/// the numeric values; deployed miners match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumError {
    /// Client not connected
    NotConnected,
    /// Unclassified error
    Unknown,
    /// Submitted job id not in history
    JobNotFound,
    /// Share already submitted
    DuplicateShare,
    /// Share below session difficulty
    LowDifficultyShare,
    /// Worker not authorized
    Unauthorized,
    /// Session not subscribed
    Unsubscribed,
    /// Proof-of-work does not verify
    InvalidSolution,
    /// Malformed version field
    FormatVersion,
    /// Malformed configure params
    FormatConfigure,
    /// Malformed subscribe params
    FormatSubscribe,
    /// Malformed authorize params
    FormatAuthorize,
    /// Malformed submit params
    FormatSubmit,
    /// Malformed share fields
    FormatShare,
    /// Unknown method name
    Unsupported,
    /// Authorization attempted more than once
    MultipleAuth,
}

impl StratumError {
    /// Numeric wire code
    pub fn code(self) -> i32 {
        match self {
            Self::NotConnected => 19,
            Self::Unknown => 20,
            Self::JobNotFound => 21,
            Self::DuplicateShare => 22,
            Self::LowDifficultyShare => 23,
            Self::Unauthorized => 24,
            Self::Unsubscribed => 25,
            Self::InvalidSolution => 26,
            Self::FormatVersion => 28,
            Self::FormatConfigure => 29,
            Self::FormatSubscribe => 30,
            Self::FormatAuthorize => 31,
            Self::FormatSubmit => 32,
            Self::FormatShare => 33,
            Self::Unsupported => 34,
            Self::MultipleAuth => 40,
        }
    }

    /// Client-facing message text
    pub fn message(self) -> &'static str {
        match self {
            Self::NotConnected => "Not Connected",
            Self::Unknown => "Unknown Error",
            Self::JobNotFound => "Job Not Found",
            Self::DuplicateShare => "Duplicate Share",
            Self::LowDifficultyShare => "Low Difficulty Share",
            Self::Unauthorized => "Unauthorized Worker",
            Self::Unsubscribed => "Not Subscribed",
            Self::InvalidSolution => "Invalid solution",
            Self::FormatVersion => "Invalid Version Format",
            Self::FormatConfigure => "Invalid Configure Format",
            Self::FormatSubscribe => "Invalid Subscribe Format",
            Self::FormatAuthorize => "Invalid Authorize Format",
            Self::FormatSubmit => "Invalid Submit Format",
            Self::FormatShare => "Invalid Share Format",
            Self::Unsupported => "Unsupported Method",
            Self::MultipleAuth => "Multiple Authorization",
        }
    }

    /// Build the wire error object
    pub fn reply(self) -> ErrorReply {
        ErrorReply {
            code: self.code(),
            message: self.message().to_string(),
        }
    }
}
