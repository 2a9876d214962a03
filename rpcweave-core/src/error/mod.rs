//! Error handling for rpcweave.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - the JSON-RPC 2.0 error object carried on the wire
//! - [`RpcError`] - protocol-level failures on the serving side, each mapped
//!   to a JSON-RPC code and an HTTP status hint
//! - [`DispatchError`] - misuse of the dispatch pipeline's control surface
//! - [`CallError`] - the outcome of a failed client call
//! - [`TransportError`] - failures reported by a client transport

pub mod jsonrpc;

use jsonrpc::ResponseError;
use thiserror::Error;

use crate::jsonrpc::RequestMessage;

/// Standard and implementation-defined JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// The transport verb is not accepted (HTTP 405).
    pub const METHOD_NOT_ALLOWED: i32 = -32010;
    /// The payload media type is not accepted (HTTP 415).
    pub const UNSUPPORTED_MEDIA_TYPE: i32 = -32011;
    /// The request was cancelled before it completed.
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// Protocol-level errors raised while serving requests.
///
/// Each variant maps to a JSON-RPC error code and, for transport-level
/// failures, an HTTP status hint.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    /// Invalid JSON in the payload.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse error
        details: String,
    },

    /// The payload is not a valid JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// Description of what makes the request invalid
        details: String,
    },

    /// The requested method does not exist.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found
        method: String,
    },

    /// The method parameters are invalid.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the parameter validation failure
        details: String,
    },

    /// The transport verb is not accepted.
    #[error("HTTP method '{method}' is not allowed")]
    MethodNotAllowed {
        /// The rejected verb
        method: String,
    },

    /// The payload media type is not accepted.
    #[error("Unsupported media type '{content_type}'")]
    UnsupportedMediaType {
        /// The rejected content type (empty when the header was missing)
        content_type: String,
    },

    /// The request was cancelled by the caller.
    #[error("Request was cancelled")]
    RequestCancelled,

    /// Internal error - should not happen.
    #[error("Internal error: {details}")]
    InternalError {
        /// Description for logs; not meant to be acted on by clients
        details: String,
    },
}

impl RpcError {
    /// Maps the error to its JSON-RPC 2.0 error code.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => codes::PARSE_ERROR,
            Self::InvalidRequest { .. } => codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::InternalError { .. } => codes::INTERNAL_ERROR,
            Self::MethodNotAllowed { .. } => codes::METHOD_NOT_ALLOWED,
            Self::UnsupportedMediaType { .. } => codes::UNSUPPORTED_MEDIA_TYPE,
            Self::RequestCancelled => codes::REQUEST_CANCELLED,
        }
    }

    /// HTTP status a transport binding should answer with.
    ///
    /// Handler-level errors return `None`; they travel inside a normal
    /// JSON-RPC response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::ParseError { .. } | Self::InvalidRequest { .. } => Some(400),
            Self::MethodNotAllowed { .. } => Some(405),
            Self::UnsupportedMediaType { .. } => Some(415),
            Self::InternalError { .. } => Some(500),
            Self::MethodNotFound { .. } | Self::InvalidParams { .. } | Self::RequestCancelled => {
                None
            }
        }
    }

    /// Build the wire error object for this error.
    pub fn to_response_error(&self) -> ResponseError {
        ResponseError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: None,
            http_status: self.http_status(),
        }
    }
}

/// Misuse of the dispatch pipeline's control surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// `try_cancel` was called on a pipeline built without cancellation support.
    #[error("cancellation is not supported by this pipeline")]
    CancellationUnsupported,
}

/// Failures reported by a [`ClientTransport`](crate::client::ClientTransport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The cancellation signal fired while sending or awaiting.
    #[error("transport operation was cancelled")]
    Cancelled,

    /// The transport is closed and cannot carry more messages.
    #[error("transport is closed")]
    Closed,

    /// The request could not be sent.
    #[error("failed to send request: {reason}")]
    Send {
        /// Description of the failure
        reason: String,
    },
}

/// Outcome of a failed client call.
///
/// Exactly one of these (or a successful result) is observed per call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    /// Local failure converting between native values and wire values.
    ///
    /// Never retried. `request` is attached when the failure happened after
    /// the request was sent (result conversion), for diagnostics.
    #[error("contract error: {message}")]
    Contract {
        /// The underlying conversion failure
        message: String,
        /// The request that produced the unconvertible response
        request: Option<Box<RequestMessage>>,
    },

    /// The peer answered with an error object, reported verbatim.
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ResponseError),

    /// The call's cancellation signal fired before or during the call.
    #[error("call was cancelled")]
    Cancelled,

    /// The transport failed to deliver the request or its response.
    #[error("transport error: {reason}")]
    Transport {
        /// Description of the failure
        reason: String,
    },
}

impl CallError {
    /// Contract error raised before anything was sent.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
            request: None,
        }
    }

    /// Returns the remote error object, if this is a remote error.
    pub fn as_remote(&self) -> Option<&ResponseError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => CallError::Cancelled,
            other => CallError::Transport {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let cases = [
            (
                RpcError::ParseError {
                    details: String::new(),
                },
                -32700,
                Some(400),
            ),
            (
                RpcError::InvalidRequest {
                    details: String::new(),
                },
                -32600,
                Some(400),
            ),
            (
                RpcError::MethodNotFound {
                    method: "x".to_string(),
                },
                -32601,
                None,
            ),
            (
                RpcError::MethodNotAllowed {
                    method: "PUT".to_string(),
                },
                -32010,
                Some(405),
            ),
            (
                RpcError::UnsupportedMediaType {
                    content_type: "text/plain".to_string(),
                },
                -32011,
                Some(415),
            ),
            (RpcError::RequestCancelled, -32800, None),
            (
                RpcError::InternalError {
                    details: String::new(),
                },
                -32603,
                Some(500),
            ),
        ];

        for (error, code, status) in cases {
            assert_eq!(error.to_jsonrpc_code(), code, "{error:?}");
            assert_eq!(error.http_status(), status, "{error:?}");
            let wire = error.to_response_error();
            assert_eq!(wire.code, code);
            assert_eq!(wire.http_status, status);
        }
    }

    #[test]
    fn test_method_not_found_message() {
        let error = RpcError::MethodNotFound {
            method: "nope".to_string(),
        };
        assert_eq!(error.to_response_error().message, "Method 'nope' not found");
    }

    #[test]
    fn test_transport_cancel_maps_to_call_cancel() {
        assert_eq!(CallError::from(TransportError::Cancelled), CallError::Cancelled);
        assert!(matches!(
            CallError::from(TransportError::Closed),
            CallError::Transport { .. }
        ));
    }
}
