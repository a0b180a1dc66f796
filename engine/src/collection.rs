//! Collections: typed, id-addressed stores built on the resource CRDT.
//!
//! A collection validates values through its schema collaborator, stamps
//! writes with the database's shared clock, and reports every mutation
//! through a batched event stream. Outside a transaction each write flushes
//! immediately; inside a transaction the staging collection accumulates the
//! batch and the commit decides when it is emitted.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::clock::{lock_clock, SharedClock};
use crate::document::{ChangeSet, Document};
use crate::error::{Error, Result};
use crate::events::{Added, EventBus, MutationEvent, Removed, SubscriptionId, Updated};
use crate::eventstamp::Eventstamp;
use crate::resource::Resource;
use crate::schema::Validator;
use crate::tree::Attributes;
use crate::{CollectionName, ResourceId};

/// Extracts the id of a raw value; `None` when the value carries no id.
pub type GetId = Arc<dyn Fn(&Value) -> Option<ResourceId> + Send + Sync>;

/// Per-collection wiring: the schema collaborator and the id extractor.
#[derive(Clone)]
pub struct CollectionConfig {
    pub schema: Arc<dyn Validator>,
    pub get_id: GetId,
}

impl CollectionConfig {
    /// Create a config reading the id from the value's `id` field.
    pub fn new(schema: Arc<dyn Validator>) -> Self {
        Self {
            schema,
            get_id: Arc::new(|value| {
                value
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        }
    }

    /// Replace the id extractor.
    pub fn with_get_id(
        mut self,
        get_id: impl Fn(&Value) -> Option<ResourceId> + Send + Sync + 'static,
    ) -> Self {
        self.get_id = Arc::new(get_id);
        self
    }
}

/// An in-memory collection of resources keyed by id.
pub struct Collection {
    name: CollectionName,
    resources: BTreeMap<ResourceId, Resource>,
    schema: Arc<dyn Validator>,
    get_id: GetId,
    clock: SharedClock,
    bus: EventBus<MutationEvent>,
    pending: MutationEvent,
    auto_flush: bool,
}

impl Collection {
    /// Create an empty collection bound to the database's shared clock.
    pub fn new(name: impl Into<CollectionName>, config: CollectionConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            resources: BTreeMap::new(),
            schema: config.schema,
            get_id: config.get_id,
            clock,
            bus: EventBus::new(),
            pending: MutationEvent::default(),
            auto_flush: true,
        }
    }

    /// The collection name, used as the resource-type label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes of a live resource, or `None` when absent or tombstoned.
    pub fn get(&self, id: &str) -> Option<Attributes> {
        self.resources
            .get(id)
            .filter(|resource| !resource.is_deleted())
            .map(|resource| resource.attributes.clone())
    }

    /// Attributes of a resource regardless of its tombstone.
    pub fn get_including_deleted(&self, id: &str) -> Option<Attributes> {
        self.resources
            .get(id)
            .map(|resource| resource.attributes.clone())
    }

    /// Attributes of every live resource.
    pub fn get_all(&self) -> Vec<Attributes> {
        self.query().all()
    }

    /// Live resources matching a predicate.
    pub fn find<F>(&self, predicate: F) -> Vec<Attributes>
    where
        F: Fn(&Attributes) -> bool + 'static,
    {
        self.query().filter(predicate).all()
    }

    /// Start a query over this collection.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Validate and insert a new value.
    ///
    /// The id is derived via the configured extractor; every leaf is stamped
    /// with a fresh eventstamp. Fails with [`Error::DuplicateId`] when the id
    /// is already present, tombstoned ids included.
    pub fn add(&mut self, value: &Value) -> Result<Attributes> {
        let validated = self.schema.validate(value).map_err(Error::Validation)?;
        let id = (self.get_id)(&validated).ok_or(Error::MissingId)?;
        if self.resources.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }

        let stamp = self.next_stamp();
        let resource = Resource::make(&self.name, &id, &validated, &stamp, None)?;
        let after = resource.attributes.clone();

        self.resources.insert(id.clone(), resource);
        self.pending.added.push(Added {
            id,
            after: after.clone(),
        });
        self.flush_if_auto();
        Ok(after)
    }

    /// Merge a freshly-stamped partial value into an existing resource.
    ///
    /// The merged attributes are re-validated before anything is stored.
    /// Fails with [`Error::NotFound`] when the id is absent or tombstoned.
    pub fn update(&mut self, id: &str, patch: &Value) -> Result<Attributes> {
        let existing = self
            .resources
            .get(id)
            .filter(|resource| !resource.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let stamp = self.next_stamp();
        let partial = Resource::make(&self.name, id, patch, &stamp, None)?;
        let merged = existing.merge(&partial)?;

        self.schema
            .validate(&Value::Object(merged.attributes.clone()))
            .map_err(Error::Validation)?;

        let before = existing.attributes.clone();
        let after = merged.attributes.clone();
        self.resources.insert(id.to_string(), merged);
        self.pending.updated.push(Updated {
            id: id.to_string(),
            before,
            after: after.clone(),
        });
        self.flush_if_auto();
        Ok(after)
    }

    /// Tombstone a resource with a fresh eventstamp.
    ///
    /// Fails with [`Error::NotFound`] when the id is absent or already
    /// tombstoned.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let existing = self
            .resources
            .get(id)
            .filter(|resource| !resource.is_deleted())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let stamp = self.next_stamp();
        let deleted = existing.delete(&stamp);
        let before = existing.attributes.clone();

        self.resources.insert(id.to_string(), deleted);
        self.pending.removed.push(Removed {
            id: id.to_string(),
            before,
        });
        self.flush_if_auto();
        Ok(())
    }

    /// Merge an external document into this collection.
    ///
    /// The shared clock is forwarded with the document's summary stamp, the
    /// resources merge per the document CRDT, and newly-added or updated
    /// resources are re-validated before the new state replaces the old; a
    /// validation failure leaves the collection untouched. The classified
    /// changes are enqueued and, outside a transaction, flushed as one
    /// mutation event.
    pub fn merge(&mut self, document: &Document) -> Result<ChangeSet> {
        lock_clock(&self.clock).forward(&document.meta.latest);

        let current = Document::new(self.data_latest(), self.resources.values().cloned().collect());
        let (merged, changes) = current.merge(document)?;

        for id in changes.added.iter().chain(changes.updated.iter()) {
            if let Some(resource) = merged.data.iter().find(|resource| &resource.id == id) {
                self.schema
                    .validate(&Value::Object(resource.attributes.clone()))
                    .map_err(Error::Validation)?;
            }
        }

        // Snapshot pre-merge attributes so update/remove events carry an
        // accurate `before`.
        let mut befores: HashMap<ResourceId, Attributes> = HashMap::new();
        for id in changes.updated.iter().chain(changes.deleted.iter()) {
            if let Some(resource) = self.resources.get(id) {
                befores.insert(id.clone(), resource.attributes.clone());
            }
        }

        self.resources = merged
            .data
            .into_iter()
            .map(|resource| (resource.id.clone(), resource))
            .collect();

        for id in &changes.added {
            if let Some(resource) = self.resources.get(id) {
                self.pending.added.push(Added {
                    id: id.clone(),
                    after: resource.attributes.clone(),
                });
            }
        }
        for id in &changes.updated {
            if let Some(resource) = self.resources.get(id) {
                self.pending.updated.push(Updated {
                    id: id.clone(),
                    before: befores.remove(id).unwrap_or_default(),
                    after: resource.attributes.clone(),
                });
            }
        }
        for id in &changes.deleted {
            self.pending.removed.push(Removed {
                id: id.clone(),
                before: befores.remove(id).unwrap_or_default(),
            });
        }

        tracing::debug!(
            collection = %self.name,
            added = changes.added.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "merged external document"
        );

        self.flush_if_auto();
        Ok(changes)
    }

    /// Export the collection as a document.
    ///
    /// Tombstoned resources are included: the document is the inter-replica
    /// format and tombstones participate in merges. The summary stamp is the
    /// maximum of every resource's `latest` and a fresh clock tick, so a
    /// receiver can forward its clock from the header alone.
    pub fn to_document(&self) -> Document {
        let mut latest = lock_clock(&self.clock).now();
        for resource in self.resources.values() {
            if resource.meta.latest > latest {
                latest = resource.meta.latest.clone();
            }
        }
        Document::new(latest, self.resources.values().cloned().collect())
    }

    /// Subscribe to this collection's mutation events.
    pub fn on_mutation(
        &self,
        handler: impl Fn(&MutationEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(handler)
    }

    /// Remove a mutation subscriber.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn next_stamp(&self) -> Eventstamp {
        lock_clock(&self.clock).now()
    }

    /// Greatest eventstamp across stored resources, without advancing the
    /// clock.
    fn data_latest(&self) -> Eventstamp {
        let mut latest = Eventstamp::min();
        for resource in self.resources.values() {
            if resource.meta.latest > latest {
                latest = resource.meta.latest.clone();
            }
        }
        latest
    }

    fn flush_if_auto(&mut self) {
        if self.auto_flush {
            self.flush();
        }
    }

    /// Emit the pending batch as one mutation event, if it holds anything.
    pub(crate) fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return;
        }
        self.bus.emit(&batch);
    }

    /// Clone this collection's data into a staging collection that buffers
    /// writes instead of emitting them.
    pub(crate) fn clone_staging(&self) -> Collection {
        Collection {
            name: self.name.clone(),
            resources: self.resources.clone(),
            schema: self.schema.clone(),
            get_id: self.get_id.clone(),
            clock: self.clock.clone(),
            bus: EventBus::new(),
            pending: MutationEvent::default(),
            auto_flush: false,
        }
    }

    /// Replace this collection's data wholesale (transaction commit).
    pub(crate) fn replace_resources(&mut self, resources: BTreeMap<ResourceId, Resource>) {
        self.resources = resources;
    }

    /// Take the staged resources out of a staging collection.
    pub(crate) fn into_resources(self) -> BTreeMap<ResourceId, Resource> {
        self.resources
    }

    /// Drain the pending batch without emitting it.
    pub(crate) fn take_pending(&mut self) -> MutationEvent {
        std::mem::take(&mut self.pending)
    }

    /// Emit an already-drained batch through this collection's subscribers.
    pub(crate) fn emit(&self, event: &MutationEvent) {
        self.bus.emit(event);
    }
}

/// Builder for reads over a collection.
///
/// Filters compose; terminal methods return owned attribute copies.
pub struct QueryBuilder<'a> {
    collection: &'a Collection,
    include_deleted: bool,
    predicates: Vec<Box<dyn Fn(&Attributes) -> bool>>,
}

impl<'a> QueryBuilder<'a> {
    fn new(collection: &'a Collection) -> Self {
        Self {
            collection,
            include_deleted: false,
            predicates: Vec::new(),
        }
    }

    /// Include tombstoned resources in the results.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Keep only resources whose attributes match the predicate.
    pub fn filter(mut self, predicate: impl Fn(&Attributes) -> bool + 'static) -> Self {
        self.predicates.push(Box::new(predicate));
        self
    }

    /// All matching resources.
    pub fn all(self) -> Vec<Attributes> {
        self.matches().map(|r| r.attributes.clone()).collect()
    }

    /// All matching resources, sorted with the comparator.
    pub fn sorted_by(
        self,
        mut compare: impl FnMut(&Attributes, &Attributes) -> Ordering,
    ) -> Vec<Attributes> {
        let mut results = self.all();
        results.sort_by(|a, b| compare(a, b));
        results
    }

    /// The first matching resource, in id order.
    pub fn first(self) -> Option<Attributes> {
        self.matches().next().map(|r| r.attributes.clone())
    }

    /// Number of matching resources.
    pub fn count(self) -> usize {
        self.matches().count()
    }

    fn matches<'q>(&'q self) -> impl Iterator<Item = &'a Resource> + 'q {
        self.collection
            .resources
            .values()
            .filter(move |resource| self.include_deleted || !resource.is_deleted())
            .filter(move |resource| {
                self.predicates
                    .iter()
                    .all(|predicate| predicate(&resource.attributes))
            })
    }
}
