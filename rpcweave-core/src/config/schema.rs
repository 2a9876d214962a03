//! Configuration schema type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// Every field has a default, so an empty mapping is a valid file.
///
/// # Example
/// ```yaml
/// dispatch:
///   ordered_output: true
///   cancel_method: "$/cancelRequest"
///
/// http:
///   listen: "0.0.0.0:${RPCWEAVE_PORT:-8080}"
///   path: /rpc
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Dispatch pipeline settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// HTTP binding settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Dispatch pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Emit responses in the order requests were accepted.
    #[serde(default)]
    pub ordered_output: bool,

    /// Allow in-flight requests to be cancelled by id.
    #[serde(default = "default_true")]
    pub allow_cancellation: bool,

    /// Notification method treated as a cancel request, e.g. `$/cancelRequest`.
    #[serde(default)]
    pub cancel_method: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ordered_output: false,
            allow_cancellation: true,
            cancel_method: None,
        }
    }
}

/// HTTP binding settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Socket address to bind.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Route serving JSON-RPC requests.
    #[serde(default = "default_path")]
    pub path: String,

    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Smallest accepted request body, in bytes.
    #[serde(default = "default_min_body_length")]
    pub min_body_length: usize,

    /// Media type of response bodies.
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Charset appended to the response content type.
    #[serde(default = "default_charset")]
    pub charset: Option<String>,

    /// Status sent when there is no response body (200 or 204).
    #[serde(default = "default_empty_response_status")]
    pub empty_response_status: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            max_body_size: default_max_body_size(),
            min_body_length: default_min_body_length(),
            content_type: default_content_type(),
            charset: default_charset(),
            empty_response_status: default_empty_response_status(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_path() -> String {
    "/rpc".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

// Shortest JSON object, `{}`.
fn default_min_body_length() -> usize {
    2
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_charset() -> Option<String> {
    Some("utf-8".to_string())
}

fn default_empty_response_status() -> u16 {
    204
}
