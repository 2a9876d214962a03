//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The endpoint path does not start with `/`.
    #[error("invalid http.path '{path}': must start with '/'")]
    InvalidPath { path: String },

    /// The response content type is not a JSON media type.
    #[error("invalid http.content_type '{content_type}': must start with 'application/json'")]
    InvalidContentType { content_type: String },

    /// The minimum body length exceeds the maximum body size.
    #[error("http.min_body_length {min} exceeds http.max_body_size {max}")]
    InvalidBodyLimits { min: usize, max: usize },

    /// The status used for empty responses is neither 200 nor 204.
    #[error("invalid http.empty_response_status {status}: must be 200 or 204")]
    InvalidEmptyResponseStatus { status: u16 },

    /// The listen address does not parse as a socket address.
    #[error("invalid http.listen '{listen}': {message}")]
    InvalidListenAddress { listen: String, message: String },

    /// `dispatch.cancel_method` is set but empty.
    #[error("dispatch.cancel_method must not be empty")]
    EmptyCancelMethod,

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file not found at any search location.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}
