//! JSON-RPC over HTTP.
//!
//! One JSON-RPC message per HTTP request. The body is validated and parsed
//! here, then handed to [`DispatchPipeline::dispatch`]; the response (if any)
//! is written back as the HTTP body.
//!
//! Status codes:
//! - validation and parse failures use the error's HTTP hint (400, 405, 415);
//!   a body that fails to parse is answered with its id when one is readable
//! - a dispatched response is sent with its error's hint, else 200
//! - no response (notifications) is sent with the configured empty status
//!   and no body

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use rpcweave_core::config::HttpConfig;
use rpcweave_core::dispatch::DispatchPipeline;
use rpcweave_core::error::RpcError;
use rpcweave_core::jsonrpc::{Message, MessageId, ResponseMessage, parse_message, recover_id};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::HttpError;

/// Fallback body when a response cannot be serialized.
const INTERNAL_ERROR_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// HTTP binding settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBindingConfig {
    /// Route serving JSON-RPC
    pub path: String,
    /// Largest accepted body, in bytes
    pub max_body_size: usize,
    /// Smallest accepted body, in bytes
    pub min_body_length: usize,
    /// Response media type
    pub content_type: String,
    /// Response charset, appended to the content type when set
    pub charset: Option<String>,
    /// Status used when there is nothing to send back
    pub empty_response_status: StatusCode,
}

impl Default for HttpBindingConfig {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for HttpBindingConfig {
    fn from(config: &HttpConfig) -> Self {
        Self {
            path: config.path.clone(),
            max_body_size: config.max_body_size,
            min_body_length: config.min_body_length,
            content_type: config.content_type.clone(),
            charset: config.charset.clone(),
            empty_response_status: StatusCode::from_u16(config.empty_response_status)
                .unwrap_or(StatusCode::NO_CONTENT),
        }
    }
}

impl HttpBindingConfig {
    /// Value of the response `Content-Type` header.
    pub fn response_content_type(&self) -> String {
        match &self.charset {
            Some(charset) => format!("{}; charset={charset}", self.content_type),
            None => self.content_type.clone(),
        }
    }
}

/// Shared state for the axum handler.
#[derive(Debug, Clone)]
pub struct HttpBinding {
    pipeline: DispatchPipeline,
    config: Arc<HttpBindingConfig>,
    content_type: HeaderValue,
}

impl HttpBinding {
    pub fn new(pipeline: DispatchPipeline, config: HttpBindingConfig) -> Self {
        let content_type = HeaderValue::from_str(&config.response_content_type())
            .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
        Self {
            pipeline,
            config: Arc::new(config),
            content_type,
        }
    }

    pub fn config(&self) -> &HttpBindingConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &DispatchPipeline {
        &self.pipeline
    }

    /// Build the axum router.
    ///
    /// All verbs are routed to the handler so that rejected verbs still get
    /// a JSON-RPC error body.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, any(handle_rpc))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(self.clone())
    }

    fn respond(&self, response: Option<ResponseMessage>) -> Response {
        let Some(response) = response else {
            return self.config.empty_response_status.into_response();
        };

        let status = response
            .error
            .as_ref()
            .and_then(|e| e.http_status)
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK);

        match serde_json::to_vec(&response) {
            Ok(bytes) => (
                status,
                [(header::CONTENT_TYPE, self.content_type.clone())],
                bytes,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, self.content_type.clone())],
                    Bytes::from_static(INTERNAL_ERROR_BODY),
                )
                    .into_response()
            }
        }
    }

    fn reject(&self, error: RpcError) -> Response {
        self.reject_with_id(None, error)
    }

    fn reject_with_id(&self, id: Option<MessageId>, error: RpcError) -> Response {
        debug!(id = ?id, error = %error, "rejecting HTTP request");
        self.respond(Some(ResponseMessage::error(id, error.to_response_error())))
    }
}

/// Check verb, media type and body length before parsing.
pub fn validate_request(
    method: &Method,
    content_type: Option<&str>,
    body_len: usize,
    min_body_length: usize,
) -> Result<(), RpcError> {
    if *method != Method::POST && *method != Method::GET {
        return Err(RpcError::MethodNotAllowed {
            method: method.to_string(),
        });
    }

    let content_type = content_type.unwrap_or_default();
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("application/json")
    {
        return Err(RpcError::UnsupportedMediaType {
            content_type: content_type.to_string(),
        });
    }

    if body_len < min_body_length {
        return Err(RpcError::InvalidRequest {
            details: format!("body is {body_len} bytes, shorter than {min_body_length}"),
        });
    }

    Ok(())
}

/// Axum handler for the JSON-RPC route.
pub async fn handle_rpc(
    State(binding): State<HttpBinding>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return binding.reject(RpcError::InvalidRequest {
                details: rejection.body_text(),
            });
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = validate_request(
        &method,
        content_type,
        body.len(),
        binding.config.min_body_length,
    ) {
        return binding.reject(e);
    }

    let request = match parse_message(&body) {
        Ok(Message::Request(request)) => request,
        Ok(_) => {
            return binding.reject(RpcError::InvalidRequest {
                details: "expected a request or notification".to_string(),
            });
        }
        Err(e) => {
            return binding.reject_with_id(
                recover_id(&body),
                RpcError::InvalidRequest {
                    details: e.to_string(),
                },
            );
        }
    };

    let response = binding.pipeline.dispatch(Message::Request(request)).await;
    binding.respond(response)
}

/// Bind `listen` and serve `binding` until `shutdown` fires.
pub async fn serve(
    listen: &str,
    binding: HttpBinding,
    shutdown: CancellationToken,
) -> Result<(), HttpError> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e: std::net::AddrParseError| HttpError::InvalidListenAddress {
            addr: listen.to_string(),
            reason: e.to_string(),
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HttpError::Bind { addr, source })?;

    info!(addr = %addr, path = %binding.config.path, "JSON-RPC endpoint listening");
    axum::serve(listener, binding.router())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("JSON-RPC endpoint stopped");
    Ok(())
}
