//! Documents: the unit of inter-replica exchange.
//!
//! A document bundles resources with a summary eventstamp. Merging two
//! documents merges their resources id by id and classifies what changed so
//! the collection layer can emit mutation events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eventstamp::Eventstamp;
use crate::resource::Resource;
use crate::ResourceId;

/// The JSON:API version advertised in every document.
pub const JSONAPI_VERSION: &str = "1.1";

/// The `jsonapi` header object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonApi {
    pub version: String,
}

impl Default for JsonApi {
    fn default() -> Self {
        Self {
            version: JSONAPI_VERSION.to_string(),
        }
    }
}

/// Document-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// Greatest eventstamp known to the emitting replica; receivers forward
    /// their clocks from it.
    pub latest: Eventstamp,
}

/// A serializable bundle of resources.
///
/// Unknown fields in an incoming document are dropped on deserialization;
/// consumers that need byte-level pass-through should retain the raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub jsonapi: JsonApi,
    pub meta: DocumentMeta,
    pub data: Vec<Resource>,
}

/// Classification of a document merge, keyed by resource id.
///
/// The three groupings are disjoint. Bucket order follows `from.data` order,
/// so the classification is deterministic for a given input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// New ids that arrived without a tombstone.
    pub added: Vec<ResourceId>,
    /// Pre-existing ids whose visible state changed and remain live.
    pub updated: Vec<ResourceId>,
    /// Pre-existing ids whose tombstone newly appeared.
    pub deleted: Vec<ResourceId>,
}

impl ChangeSet {
    /// True when no bucket has entries.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

impl Document {
    /// Create a document from a summary stamp and resources.
    pub fn new(latest: Eventstamp, data: Vec<Resource>) -> Self {
        Self {
            jsonapi: JsonApi::default(),
            meta: DocumentMeta { latest },
            data,
        }
    }

    /// Merge `from` into this document, resource by resource.
    ///
    /// Returns the merged document and the classified change set. Resources
    /// already present merge per [`Resource::merge`]; new ids are inserted
    /// verbatim. Once a resource is tombstoned, later attribute churn merges
    /// in silently and is never re-classified as an update. Equality of the
    /// cached `latest` stamps is the cheap no-op filter: merging an
    /// identical document yields an empty change set.
    pub fn merge(&self, from: &Document) -> Result<(Document, ChangeSet)> {
        let mut data = self.data.clone();
        let mut index: HashMap<ResourceId, usize> = data
            .iter()
            .enumerate()
            .map(|(position, resource)| (resource.id.clone(), position))
            .collect();

        let mut newest = self.meta.latest.clone().max(from.meta.latest.clone());
        let mut changes = ChangeSet::default();

        for incoming in &from.data {
            match index.get(&incoming.id) {
                None => {
                    index.insert(incoming.id.clone(), data.len());
                    if incoming.meta.deleted_at.is_none() {
                        changes.added.push(incoming.id.clone());
                    }
                    data.push(incoming.clone());
                }
                Some(&position) => {
                    let existing = &data[position];
                    if existing == incoming {
                        continue;
                    }

                    let merged = existing.merge(incoming)?;
                    if merged.meta.latest > newest {
                        newest = merged.meta.latest.clone();
                    }

                    let was_deleted = existing.is_deleted();
                    let is_deleted = merged.is_deleted();
                    if !was_deleted && is_deleted {
                        changes.deleted.push(incoming.id.clone());
                    } else if !is_deleted && existing.meta.latest != merged.meta.latest {
                        changes.updated.push(incoming.id.clone());
                    }

                    data[position] = merged;
                }
            }
        }

        Ok((Document::new(newest, data), changes))
    }

    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Deserialize from the wire JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidDocument(e.to_string()))
    }
}
