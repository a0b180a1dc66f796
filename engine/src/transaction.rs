//! Snapshot-isolated transactions over a database's collections.
//!
//! A transaction stages work in lazily-cloned copies of the collections it
//! touches. The first access to a collection clones its data once
//! (copy-on-write); collections never touched stay untouched. On commit the
//! staged data replaces the live data wholesale and each touched collection
//! emits one batched mutation event through its live subscribers. On
//! rollback, or when the callback fails, the staging state is dropped and no
//! event is emitted.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde_json::Value;

use crate::collection::{Collection, QueryBuilder};
use crate::database::Database;
use crate::document::{ChangeSet, Document};
use crate::error::{Error, Result};
use crate::tree::Attributes;
use crate::CollectionName;

/// A transactional unit of work. Created by [`Database::begin`].
pub struct Transaction<'db> {
    db: &'db mut Database,
    staged: HashMap<CollectionName, Collection>,
    rolled_back: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db mut Database) -> Self {
        Self {
            db,
            staged: HashMap::new(),
            rolled_back: false,
        }
    }

    /// Access a collection inside the transaction.
    ///
    /// The first access clones the live collection's data into staging;
    /// every later access, read or write, targets that snapshot plus the
    /// transaction's own writes.
    pub fn collection(&mut self, key: &str) -> Result<TxCollection<'_>> {
        let inner = match self.staged.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let live = self
                    .db
                    .live_collection(key)
                    .ok_or_else(|| Error::UnknownCollection(key.to_string()))?;
                entry.insert(live.clone_staging())
            }
        };
        Ok(TxCollection { inner })
    }

    /// Abort the transaction; staged writes are discarded at the end of the
    /// callback and no events are emitted.
    pub fn rollback(&mut self) {
        self.rolled_back = true;
    }

    pub(crate) fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Replace live data with the staged maps and flush one batched event
    /// per touched collection, in collection registration order.
    pub(crate) fn commit(mut self) {
        let order: Vec<CollectionName> = self.db.registration_order().to_vec();
        for key in order {
            let Some(mut staged) = self.staged.remove(&key) else {
                continue;
            };
            let batch = staged.take_pending();
            let Some(live) = self.db.live_collection_mut(&key) else {
                continue;
            };
            live.replace_resources(staged.into_resources());
            // Events go out only after the new data is visible to reads.
            if !batch.is_empty() {
                live.emit(&batch);
            }
        }
    }
}

/// The mutation surface of one collection inside a transaction.
///
/// Reads observe the snapshot taken on first access plus the transaction's
/// own writes. Subscription and document export are deliberately absent;
/// they belong to the live collection.
pub struct TxCollection<'tx> {
    inner: &'tx mut Collection,
}

impl TxCollection<'_> {
    /// Attributes of a live resource, or `None` when absent or tombstoned.
    pub fn get(&self, id: &str) -> Option<Attributes> {
        self.inner.get(id)
    }

    /// Attributes of a resource regardless of its tombstone.
    pub fn get_including_deleted(&self, id: &str) -> Option<Attributes> {
        self.inner.get_including_deleted(id)
    }

    /// Attributes of every live resource.
    pub fn get_all(&self) -> Vec<Attributes> {
        self.inner.get_all()
    }

    /// Live resources matching a predicate.
    pub fn find<F>(&self, predicate: F) -> Vec<Attributes>
    where
        F: Fn(&Attributes) -> bool + 'static,
    {
        self.inner.find(predicate)
    }

    /// Start a query over the staged state.
    pub fn query(&self) -> QueryBuilder<'_> {
        self.inner.query()
    }

    /// Validate and insert a new value.
    pub fn add(&mut self, value: &Value) -> Result<Attributes> {
        self.inner.add(value)
    }

    /// Merge a freshly-stamped partial value into an existing resource.
    pub fn update(&mut self, id: &str, patch: &Value) -> Result<Attributes> {
        self.inner.update(id, patch)
    }

    /// Tombstone a resource.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.inner.remove(id)
    }

    /// Merge an external document into the staged state.
    pub fn merge(&mut self, document: &Document) -> Result<ChangeSet> {
        self.inner.merge(document)
    }
}
