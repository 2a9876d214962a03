//! JSON-RPC 2.0 error object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 error object carried in a [`ResponseMessage`].
///
/// `http_status` is a local hint for transport bindings and never appears on
/// the wire.
///
/// [`ResponseMessage`]: crate::jsonrpc::ResponseMessage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code (standard JSON-RPC or implementation-defined)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// HTTP status a transport binding should use for this error
    #[serde(skip)]
    pub http_status: Option<u16>,
}

impl ResponseError {
    /// Create an error object without data or status hint.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            http_status: None,
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an HTTP status hint.
    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}
