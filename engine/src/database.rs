//! The database: named coordinator over collections, clock and plugins.
//!
//! A database owns one [`Clock`] shared by every collection, re-emits each
//! collection's mutation events at the database level for cross-collection
//! listeners, runs transactions, exports documents, and drives the plugin
//! lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::clock::{Clock, SharedClock};
use crate::collection::{Collection, CollectionConfig};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::events::{EventBus, MutationEvent, SubscriptionId};
use crate::plugin::Plugin;
use crate::transaction::Transaction;
use crate::CollectionName;

/// A collection's mutation event, re-emitted at the database level.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseEvent {
    /// Key of the collection the mutations happened in.
    pub collection: CollectionName,
    /// The batched mutations.
    pub event: MutationEvent,
}

/// Declarative description of a database: name, version and collections.
///
/// Collections are registered in call order; that order is the stable
/// iteration order for event fan-out and transaction commits.
pub struct DatabaseConfig {
    name: String,
    version: u32,
    collections: Vec<(CollectionName, CollectionConfig)>,
}

impl DatabaseConfig {
    /// Start a config for a named database.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            collections: Vec::new(),
        }
    }

    /// Register a collection.
    pub fn with_collection(
        mut self,
        key: impl Into<CollectionName>,
        config: CollectionConfig,
    ) -> Self {
        self.collections.push((key.into(), config));
        self
    }
}

/// An embedded, schema-validated, local-first document database.
pub struct Database {
    name: String,
    version: u32,
    clock: SharedClock,
    order: Vec<CollectionName>,
    collections: HashMap<CollectionName, Collection>,
    bus: Arc<EventBus<DatabaseEvent>>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Database {
    /// Build a database from a config, with a fresh system clock.
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Build a database around an explicit clock (deterministic tests).
    pub fn with_clock(config: DatabaseConfig, clock: Clock) -> Self {
        let clock = clock.shared();
        let bus = Arc::new(EventBus::new());

        let mut order = Vec::with_capacity(config.collections.len());
        let mut collections = HashMap::new();
        for (key, collection_config) in config.collections {
            let collection = Collection::new(key.clone(), collection_config, clock.clone());

            // Re-emit this collection's events at the database level.
            let forward = bus.clone();
            let collection_key = key.clone();
            collection.on_mutation(move |event: &MutationEvent| {
                forward.emit(&DatabaseEvent {
                    collection: collection_key.clone(),
                    event: event.clone(),
                });
            });

            order.push(key.clone());
            collections.insert(key, collection);
        }

        Self {
            name: config.name,
            version: config.version,
            clock,
            order,
            collections,
            bus,
            plugins: Vec::new(),
        }
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The clock shared by every collection of this database.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// A collection by key.
    pub fn collection(&self, key: &str) -> Result<&Collection> {
        self.collections
            .get(key)
            .ok_or_else(|| Error::UnknownCollection(key.to_string()))
    }

    /// A collection by key, for writing.
    pub fn collection_mut(&mut self, key: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(key)
            .ok_or_else(|| Error::UnknownCollection(key.to_string()))
    }

    /// Run a transactional callback. See [`Transaction`].
    ///
    /// Returns the callback's value when it succeeds; a callback error rolls
    /// the transaction back and propagates. A callback that called
    /// [`Transaction::rollback`] still returns its value, with every staged
    /// write discarded.
    pub fn begin<T>(
        &mut self,
        callback: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = Transaction::new(self);
        match callback(&mut tx) {
            Ok(value) => {
                if !tx.is_rolled_back() {
                    tx.commit();
                }
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Subscribe to mutation events across every collection.
    ///
    /// Per-collection order is preserved; events are not totally ordered
    /// across collections beyond the stable registration order used at
    /// transaction commits.
    pub fn on_mutation(
        &self,
        handler: impl Fn(&DatabaseEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(handler)
    }

    /// Remove a database-level mutation subscriber.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Export every collection as a document, keyed by collection.
    pub fn to_documents(&self) -> BTreeMap<CollectionName, Document> {
        self.order
            .iter()
            .filter_map(|key| {
                self.collections
                    .get(key)
                    .map(|collection| (key.clone(), collection.to_document()))
            })
            .collect()
    }

    /// Append a plugin to the registry. Takes effect at [`Database::init`].
    pub fn use_plugin(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Run every plugin's `init`, in registration order.
    ///
    /// The first failure propagates immediately and leaves the database
    /// partially initialized; the caller decides whether to dispose.
    pub async fn init(&mut self) -> Result<()> {
        let plugins = self.plugins.clone();
        for plugin in plugins {
            tracing::info!(database = %self.name, plugin = plugin.name(), "initializing plugin");
            plugin.init(self).await?;
        }
        Ok(())
    }

    /// Run every plugin's `dispose`, in reverse registration order.
    ///
    /// Best-effort: every handler runs even after a failure, and the first
    /// error is returned once all attempts finished.
    pub async fn dispose(&mut self) -> Result<()> {
        let plugins = self.plugins.clone();
        let mut first_error = None;
        for plugin in plugins.iter().rev() {
            tracing::info!(database = %self.name, plugin = plugin.name(), "disposing plugin");
            if let Err(err) = plugin.dispose(self).await {
                tracing::warn!(
                    database = %self.name,
                    plugin = plugin.name(),
                    error = %err,
                    "plugin dispose failed"
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn live_collection(&self, key: &str) -> Option<&Collection> {
        self.collections.get(key)
    }

    pub(crate) fn live_collection_mut(&mut self, key: &str) -> Option<&mut Collection> {
        self.collections.get_mut(key)
    }

    pub(crate) fn registration_order(&self) -> &[CollectionName] {
        &self.order
    }
}
