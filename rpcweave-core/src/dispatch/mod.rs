//! Dispatch pipeline.
//!
//! Consumes a stream of inbound [`Message`]s, hands every request to an
//! [`InvokeService`], and writes the responses to a sink. Each accepted
//! request runs as its own task; there is no admission control.
//!
//! # Invariants
//! - Registry entries are created before invocation and released by an RAII
//!   guard when the invocation settles, including on panic.
//! - Notifications are never registered and never produce output.
//! - A request whose invocation panics is answered with `InternalError`.

pub mod registry;
pub mod stage;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::ready;
use futures_util::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, warn};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, RpcError};
use crate::jsonrpc::{Message, MessageId, Params, RequestMessage, ResponseMessage};
use crate::service::{InvocationContext, InvokeService};

pub use registry::{CancellationRegistry, Registration};
pub use stage::{Resequencer, StageOrdering, receiver_stream, spawn_stage};

/// Construction-time options for a [`DispatchPipeline`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Emit responses in request acceptance order
    pub ordered_output: bool,
    /// Register requests so they can be cancelled by id
    pub allow_cancellation: bool,
    /// Notification method consumed by the pipeline as a cancel request
    pub cancel_method: Option<String>,
    /// Feature bundle passed to every invocation
    pub features: Arc<http::Extensions>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            ordered_output: config.ordered_output,
            allow_cancellation: config.allow_cancellation,
            cancel_method: config.cancel_method.clone(),
            features: Arc::new(http::Extensions::new()),
        }
    }
}

impl DispatchOptions {
    /// Attach a feature bundle handed to every invocation.
    #[must_use]
    pub fn with_features(mut self, features: http::Extensions) -> Self {
        self.features = Arc::new(features);
        self
    }
}

/// Dispatches requests to an invocation service.
///
/// Cheap to clone; clones share the service and the cancellation registry.
#[derive(Clone)]
pub struct DispatchPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    service: Arc<dyn InvokeService>,
    options: DispatchOptions,
    registry: Option<Arc<CancellationRegistry>>,
}

impl std::fmt::Debug for DispatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPipeline")
            .field("options", &self.inner.options)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl DispatchPipeline {
    /// Build a pipeline over `service`.
    pub fn new<S: InvokeService>(service: S, options: DispatchOptions) -> Self {
        let registry = options
            .allow_cancellation
            .then(|| Arc::new(CancellationRegistry::new()));
        Self {
            inner: Arc::new(PipelineInner {
                service: Arc::new(service),
                options,
                registry,
            }),
        }
    }

    /// Options the pipeline was built with.
    pub fn options(&self) -> &DispatchOptions {
        &self.inner.options
    }

    /// Returns true if requests can be cancelled by id.
    pub fn supports_cancellation(&self) -> bool {
        self.inner.registry.is_some()
    }

    /// Number of requests currently registered for cancellation.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.as_ref().map_or(0, |r| r.len())
    }

    /// Returns true if a cancellable request with `id` is in flight.
    pub fn is_registered(&self, id: &MessageId) -> bool {
        self.inner
            .registry
            .as_ref()
            .is_some_and(|r| r.contains(id))
    }

    /// Connect `source` to `sink`.
    ///
    /// Requests are read until the source ends or the returned link is
    /// detached (or dropped). Responses for every accepted request are still
    /// delivered, then the sink is closed. Non-request messages are dropped.
    #[must_use = "dropping the link detaches the pipeline immediately"]
    pub fn attach<S>(&self, source: S, sink: mpsc::Sender<ResponseMessage>) -> PipelineLink
    where
        S: Stream<Item = Message> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let ordering = if self.inner.options.ordered_output {
            StageOrdering::Ordered
        } else {
            StageOrdering::Completion
        };

        let requests = source.filter_map(|message| ready(into_request(message)));
        let inner = Arc::clone(&self.inner);
        let task = spawn_stage(requests, ordering, stop.clone(), sink, move |request| {
            Arc::clone(&inner).dispatch_request(request)
        });

        PipelineLink {
            stop,
            task: Some(task),
        }
    }

    /// Dispatch a single message and await its response.
    ///
    /// Returns `None` for notifications and non-request messages.
    pub async fn dispatch(&self, message: Message) -> Option<ResponseMessage> {
        let request = into_request(message)?;
        Arc::clone(&self.inner).dispatch_request(request).await
    }

    /// Signal cancellation for the in-flight request `id`.
    ///
    /// Returns `Ok(false)` if no cancellable request with that id is in
    /// flight.
    pub fn try_cancel(&self, id: &MessageId) -> Result<bool, DispatchError> {
        let registry = self
            .inner
            .registry
            .as_ref()
            .ok_or(DispatchError::CancellationUnsupported)?;
        let cancelled = registry.cancel(id);
        debug!(%id, cancelled, "cancel requested");
        Ok(cancelled)
    }
}

fn into_request(message: Message) -> Option<RequestMessage> {
    match message {
        Message::Request(request) => Some(request),
        Message::Response(response) => {
            debug!(id = ?response.id, "dropping response message on inbound side");
            None
        }
        Message::Invalid { id, reason } => {
            debug!(id = ?id, reason, "dropping invalid inbound message");
            None
        }
    }
}

impl PipelineInner {
    async fn dispatch_request(self: Arc<Self>, request: RequestMessage) -> Option<ResponseMessage> {
        if self.is_cancel_notification(&request) {
            self.handle_cancel_notification(request.params.as_ref());
            return None;
        }

        // Snapshot: the service owns the request from here on.
        let id = request.id.clone();
        let context = InvocationContext::new(Arc::clone(&self.options.features));
        let span = debug_span!(
            "dispatch",
            id = ?id,
            method = %request.method,
            correlation_id = %context.correlation_id,
        );

        let Some(id) = id else {
            // Notification: runs to completion on its own, never registered.
            let service = Arc::clone(&self.service);
            tokio::spawn(
                async move {
                    let invocation = service.invoke(request, context, None);
                    match FutureExt::catch_unwind(AssertUnwindSafe(invocation)).await {
                        Ok(Some(_)) => debug!("discarding response produced for a notification"),
                        Ok(None) => {}
                        Err(panic) => {
                            error!(
                                panic = panic_message(panic.as_ref()),
                                "notification handler panicked"
                            );
                        }
                    }
                }
                .instrument(span),
            );
            return None;
        };

        async move {
            let registration = self.register(&id, &request.method);
            let cancel = registration.as_ref().map(Registration::token);

            let invocation = self.service.invoke(request, context, cancel);
            let outcome = FutureExt::catch_unwind(AssertUnwindSafe(invocation)).await;
            drop(registration);

            let response = match outcome {
                Ok(response) => response,
                Err(panic) => {
                    error!(panic = panic_message(panic.as_ref()), "invocation panicked");
                    let error = RpcError::InternalError {
                        details: "invocation panicked".to_string(),
                    };
                    return Some(ResponseMessage::error(Some(id), error.to_response_error()));
                }
            };
            let Some(mut response) = response else {
                error!("invocation service returned no response for a request");
                return None;
            };
            if response.id.as_ref() != Some(&id) {
                warn!(response_id = ?response.id, "response id does not match request id, correcting");
                response.id = Some(id);
            }
            Some(response)
        }
        .instrument(span)
        .await
    }

    fn register(&self, id: &MessageId, method: &str) -> Option<Registration> {
        let registry = self.registry.as_ref()?;
        let registration = registry.register(id);
        if registration.is_none() {
            warn!(
                %id,
                method,
                "duplicate in-flight request id, dispatching without cancellation support"
            );
        }
        registration
    }

    fn is_cancel_notification(&self, request: &RequestMessage) -> bool {
        request.is_notification()
            && self
                .options
                .cancel_method
                .as_deref()
                .is_some_and(|m| m == request.method)
    }

    fn handle_cancel_notification(&self, params: Option<&Params>) {
        let Some(registry) = self.registry.as_ref() else {
            debug!("ignoring cancel notification, cancellation is disabled");
            return;
        };
        let Some(id) = params.and_then(|p| p.get(0, "id")).and_then(MessageId::from_value) else {
            warn!("cancel notification without a usable id");
            return;
        };
        let cancelled = registry.cancel(&id);
        debug!(%id, cancelled, "cancel notification handled");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Connection between a source, a pipeline and a sink.
///
/// Dropping the link detaches it.
#[derive(Debug)]
pub struct PipelineLink {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PipelineLink {
    /// Stop reading from the source. In-flight requests still complete and
    /// their responses are still delivered.
    pub fn detach(&self) {
        self.stop.cancel();
    }

    /// Returns true once [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Wait until every accepted request has been answered and the sink has
    /// been closed.
    pub async fn completed(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "pipeline task failed");
            }
        }
    }
}

impl Drop for PipelineLink {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.stop.cancel();
        }
    }
}

/// Cancel-request params carrying `id`, in the named form.
pub fn cancel_params(id: &MessageId) -> Params {
    let mut map = serde_json::Map::new();
    map.insert(
        "id".to_string(),
        serde_json::to_value(id).unwrap_or(Value::Null),
    );
    Params::Named(map)
}
