//! Mutation events and the subscriber registry.
//!
//! Events carry owned copies of the relevant attributes, so subscribers may
//! retain them without holding references into collection internals.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::tree::Attributes;
use crate::ResourceId;

/// A resource added to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Added {
    pub id: ResourceId,
    pub after: Attributes,
}

/// A resource whose attributes changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Updated {
    pub id: ResourceId,
    pub before: Attributes,
    pub after: Attributes,
}

/// A resource that was tombstoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removed {
    pub id: ResourceId,
    pub before: Attributes,
}

/// One batch of mutations on a single collection.
///
/// Outside a transaction every write flushes a batch holding that single
/// operation; inside a transaction all writes accumulate into one batch
/// emitted at commit, adds before updates before removes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub added: Vec<Added>,
    pub updated: Vec<Updated>,
    pub removed: Vec<Removed>,
}

impl MutationEvent {
    /// True when the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Handle returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct BusInner<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Synchronous fan-out to subscribers in subscription order.
///
/// The handler list is snapshotted before invoking, so a handler may
/// subscribe or unsubscribe during fan-out without affecting the current
/// emission.
pub struct EventBus<E> {
    inner: Mutex<BusInner<E>>,
}

impl<E> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }

    /// Register a handler; returns the id to unsubscribe with.
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(handler)));
        SubscriptionId(id)
    }

    /// Remove a handler; returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.handlers.len();
        inner.handlers.retain(|(handler_id, _)| *handler_id != id.0);
        inner.handlers.len() != before
    }

    /// Invoke every handler with `event`, in subscription order.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
