//! Cancellation registry for in-flight requests.
//!
//! Maps a request id to the cancellation token of the invocation currently
//! running under that id. The map sits behind a single mutex that is held
//! only for the map operation itself, never across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::jsonrpc::MessageId;

/// Registry of cancellable in-flight requests, keyed by request id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<MessageId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token under `id`.
    ///
    /// Returns `None` if `id` is already registered; the existing entry is
    /// left untouched. The returned guard removes the entry when dropped.
    pub fn register(self: &Arc<Self>, id: &MessageId) -> Option<Registration> {
        let token = CancellationToken::new();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(id) {
                return None;
            }
            entries.insert(id.clone(), token.clone());
        }
        Some(Registration {
            registry: Arc::clone(self),
            id: id.clone(),
            token,
        })
    }

    /// Signal cancellation for `id`.
    ///
    /// Returns false if no request is registered under `id`. The entry stays
    /// until its invocation completes.
    pub fn cancel(&self, id: &MessageId) -> bool {
        match self.entries.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true if `id` is currently registered.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &MessageId) {
        self.entries.lock().remove(id);
    }
}

/// Ownership of one registry entry. Dropping it releases the entry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    id: MessageId,
    token: CancellationToken,
}

impl Registration {
    /// The token that fires when this request is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The registered id.
    pub fn id(&self) -> &MessageId {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
