//! Client transports.
//!
//! A [`ClientTransport`] sends one request and returns the response whose id
//! matches it. [`ChannelTransport`] does this over tokio channels, which is
//! how a client is wired to an in-process [`DispatchPipeline`] or to a codec
//! task that owns the real connection.
//!
//! [`DispatchPipeline`]: crate::dispatch::DispatchPipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::jsonrpc::{Message, MessageId, RequestMessage, ResponseMessage};

/// Transport used by [`RpcClient`](super::RpcClient).
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Send `request` and, unless it is a notification, wait for the response
    /// with the same id. Returns `Ok(None)` for notifications.
    ///
    /// Must stop waiting and return [`TransportError::Cancelled`] once
    /// `cancel` fires.
    async fn send(
        &self,
        request: RequestMessage,
        cancel: CancellationToken,
    ) -> Result<Option<ResponseMessage>, TransportError>;

    /// A fresh id that no outstanding request on this transport uses.
    fn next_request_id(&self) -> MessageId;
}

#[async_trait]
impl<T: ClientTransport + ?Sized> ClientTransport for Arc<T> {
    async fn send(
        &self,
        request: RequestMessage,
        cancel: CancellationToken,
    ) -> Result<Option<ResponseMessage>, TransportError> {
        (**self).send(request, cancel).await
    }

    fn next_request_id(&self) -> MessageId {
        (**self).next_request_id()
    }
}

/// Monotonic numeric id source, starting at 1.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn next_id(&self) -> MessageId {
        MessageId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Requests awaiting a response, keyed by id.
#[derive(Debug, Default)]
struct PendingResponses {
    waiters: Mutex<HashMap<MessageId, oneshot::Sender<ResponseMessage>>>,
    closed: AtomicBool,
}

impl PendingResponses {
    fn insert(
        self: &Arc<Self>,
        id: MessageId,
    ) -> Result<(PendingGuard, oneshot::Receiver<ResponseMessage>), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if waiters.contains_key(&id) {
                return Err(TransportError::Send {
                    reason: format!("request id {id} is already awaiting a response"),
                });
            }
            waiters.insert(id.clone(), tx);
        }
        let guard = PendingGuard {
            pending: Arc::clone(self),
            id,
        };
        Ok((guard, rx))
    }

    fn complete(&self, response: ResponseMessage) -> bool {
        let waiter = response
            .id
            .as_ref()
            .and_then(|id| self.waiters.lock().remove(id));
        match waiter {
            // The caller may have given up between removal and send.
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!(id = ?response.id, "response for unknown request id, dropping");
                false
            }
        }
    }

    fn close(&self) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock();
            self.closed.store(true, Ordering::Release);
            waiters.drain().collect()
        };
        if !drained.is_empty() {
            debug!(pending = drained.len(), "failing outstanding requests on close");
        }
    }

    fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Removes a pending entry when the waiting call finishes, however it ends.
struct PendingGuard {
    pending: Arc<PendingResponses>,
    id: MessageId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.waiters.lock().remove(&self.id);
    }
}

/// [`ClientTransport`] over tokio channels.
///
/// Outbound requests are written to an `mpsc` sender as [`Message`]s.
/// Responses are routed back with [`deliver`](Self::deliver) or by a task
/// started with [`spawn_receiver`](Self::spawn_receiver).
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::Sender<Message>,
    pending: Arc<PendingResponses>,
    ids: IdGenerator,
}

impl ChannelTransport {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            outbound,
            pending: Arc::new(PendingResponses::default()),
            ids: IdGenerator::new(),
        }
    }

    /// Route one response to the call waiting on its id.
    ///
    /// Returns false when no call is waiting for it.
    pub fn deliver(&self, response: ResponseMessage) -> bool {
        self.pending.complete(response)
    }

    /// Route every response read from `inbound`.
    ///
    /// When `inbound` closes the transport is closed: outstanding calls fail
    /// with [`TransportError::Closed`] and further calls are rejected.
    pub fn spawn_receiver(&self, mut inbound: mpsc::Receiver<ResponseMessage>) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            while let Some(response) = inbound.recv().await {
                pending.complete(response);
            }
            debug!("response stream ended, closing transport");
            pending.close();
        })
    }

    /// Close the transport, failing outstanding calls.
    pub fn close(&self) {
        self.pending.close();
    }

    /// Number of calls waiting for a response.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn write(
        &self,
        request: RequestMessage,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            sent = self.outbound.send(Message::Request(request)) => {
                sent.map_err(|_| TransportError::Closed)
            }
        }
    }
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn send(
        &self,
        request: RequestMessage,
        cancel: CancellationToken,
    ) -> Result<Option<ResponseMessage>, TransportError> {
        let Some(id) = request.id.clone() else {
            self.write(request, &cancel).await?;
            return Ok(None);
        };

        // Register before writing so a fast response cannot be missed.
        let (_guard, rx) = self.pending.insert(id)?;
        self.write(request, &cancel).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            response = rx => response.map(Some).map_err(|_| TransportError::Closed),
        }
    }

    fn next_request_id(&self) -> MessageId {
        self.ids.next_id()
    }
}
