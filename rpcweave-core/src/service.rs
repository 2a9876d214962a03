//! Invocation service boundary consumed by the dispatch pipeline.
//!
//! The pipeline never resolves or executes methods itself. It hands each
//! request to an [`InvokeService`], which is responsible for turning
//! business failures into error responses. [`MethodMap`] is a small
//! name-to-handler implementation used by the bundled binary and tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::RpcError;
use crate::error::jsonrpc::ResponseError;
use crate::jsonrpc::{MessageId, Params, RequestMessage, ResponseMessage, fast_correlation_id};

/// Per-invocation context handed to the service alongside the request.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Correlation ID for tracing this invocation in logs
    pub correlation_id: Uuid,
    /// When the pipeline accepted the request
    pub received_at: Instant,
    /// Feature bundle shared by every invocation of one pipeline
    pub features: Arc<http::Extensions>,
}

impl InvocationContext {
    /// Create a context with a fresh correlation ID.
    pub fn new(features: Arc<http::Extensions>) -> Self {
        Self {
            correlation_id: fast_correlation_id(),
            received_at: Instant::now(),
            features,
        }
    }
}

/// Executes a single request.
///
/// Implementations must not panic for ordinary failures: they translate them
/// into a response carrying an error object. Returning `None` is allowed for
/// notifications; for any other request the pipeline treats it as a missing
/// response and emits nothing.
#[async_trait]
pub trait InvokeService: Send + Sync + 'static {
    /// Invoke `request`. `cancel` is `Some` only when the pipeline registered
    /// the request for cancellation.
    async fn invoke(
        &self,
        request: RequestMessage,
        context: InvocationContext,
        cancel: Option<CancellationToken>,
    ) -> Option<ResponseMessage>;
}

#[async_trait]
impl<S: InvokeService + ?Sized> InvokeService for Arc<S> {
    async fn invoke(
        &self,
        request: RequestMessage,
        context: InvocationContext,
        cancel: Option<CancellationToken>,
    ) -> Option<ResponseMessage> {
        (**self).invoke(request, context, cancel).await
    }
}

// ============================================================================
// MethodMap
// ============================================================================

/// What a [`MethodMap`] handler sees besides its params.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Request ID (None for notifications)
    pub id: Option<MessageId>,
    /// Invocation context from the pipeline
    pub invocation: InvocationContext,
    /// Cancellation signal; never fires when the request is not cancellable
    pub cancel: CancellationToken,
}

type Handler =
    Arc<dyn Fn(Option<Params>, HandlerContext) -> BoxFuture<'static, Result<Value, ResponseError>> + Send + Sync>;

/// [`InvokeService`] that maps method names to async handlers.
///
/// - Unknown methods are answered with `MethodNotFound`.
/// - Handler errors become error responses.
/// - A handler that fails after its request was cancelled is answered with
///   `RequestCancelled`.
/// - Notifications run their handler and produce no response.
#[derive(Clone, Default)]
pub struct MethodMap {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for MethodMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("MethodMap").field("methods", &methods).finish()
    }
}

impl MethodMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`, replacing any previous handler.
    #[must_use]
    pub fn with_method<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Params>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResponseError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |params: Option<Params>,
                  cx: HandlerContext|
                  -> BoxFuture<'static, Result<Value, ResponseError>> {
                Box::pin(handler(params, cx))
            },
        );
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Returns true if a handler is registered for `method`.
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

#[async_trait]
impl InvokeService for MethodMap {
    async fn invoke(
        &self,
        request: RequestMessage,
        context: InvocationContext,
        cancel: Option<CancellationToken>,
    ) -> Option<ResponseMessage> {
        let RequestMessage {
            id, method, params, ..
        } = request;

        let Some(handler) = self.handlers.get(&method).cloned() else {
            debug!(method, "no handler registered");
            let error = RpcError::MethodNotFound { method };
            return id.map(|id| ResponseMessage::error(Some(id), error.to_response_error()));
        };

        let cancel = cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return id.map(|id| {
                ResponseMessage::error(Some(id), RpcError::RequestCancelled.to_response_error())
            });
        }

        let cx = HandlerContext {
            id: id.clone(),
            invocation: context,
            cancel: cancel.clone(),
        };
        let outcome = handler(params, cx).await;

        // Notifications: the handler ran, the result is discarded.
        let id = id?;
        Some(match outcome {
            Ok(value) => ResponseMessage::success(Some(id), value),
            Err(_) if cancel.is_cancelled() => {
                ResponseMessage::error(Some(id), RpcError::RequestCancelled.to_response_error())
            }
            Err(error) => ResponseMessage::error(Some(id), error),
        })
    }
}
