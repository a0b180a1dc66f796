//! The resource CRDT: one addressable entity with per-field eventstamps.
//!
//! A resource carries an attribute tree plus a *flat* map from dotted leaf
//! path to the eventstamp of the last write at that path. Keeping the stamp
//! map flat instead of mirroring the tree makes merge a set union over keyed
//! stamps and tolerates structural change: when one replica replaces a
//! subtree with a scalar, both paths survive in the stamp map and the newer
//! one wins the materialized tree, while the older leaf's stamp stays behind
//! so an even-newer write at the old sub-path can still win later.
//!
//! Resources are value types; [`Resource::merge`] and [`Resource::delete`]
//! are pure functions returning a new resource. A resource is never removed
//! once created; deletion sets the `deleted_at` tombstone and preserves
//! attributes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::eventstamp::Eventstamp;
use crate::tree::{self, Attributes};
use crate::{DottedPath, ResourceId};

/// CRDT metadata of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    /// Eventstamp of the last write per dotted leaf path. The map is flat;
    /// intermediate keys are never stored.
    pub eventstamps: BTreeMap<DottedPath, Eventstamp>,
    /// Cached greatest eventstamp across all field stamps and `deleted_at`.
    pub latest: Eventstamp,
    /// Tombstone marker; a non-null value renders the resource invisible to
    /// reads while it keeps participating in merges.
    pub deleted_at: Option<Eventstamp>,
}

/// A single addressable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource-type label, scoped to the owning collection.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Stable, caller-supplied identifier.
    pub id: ResourceId,
    /// The attribute tree. Leaves are any non-object value; arrays are
    /// atomic.
    pub attributes: Attributes,
    /// CRDT metadata.
    pub meta: ResourceMeta,
}

impl Resource {
    /// Build a resource from raw data, stamping every leaf with `stamp`.
    ///
    /// Fails with [`Error::NotAnObject`] when `data` is not a JSON object.
    pub fn make(
        resource_type: impl Into<String>,
        id: impl Into<ResourceId>,
        data: &Value,
        stamp: &Eventstamp,
        deleted_at: Option<Eventstamp>,
    ) -> Result<Self> {
        let attributes = data.as_object().cloned().ok_or(Error::NotAnObject)?;

        let mut eventstamps = BTreeMap::new();
        for path in tree::leaf_paths(&attributes) {
            eventstamps.insert(path, stamp.clone());
        }
        let latest = latest_of(&eventstamps, deleted_at.as_ref());

        Ok(Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes,
            meta: ResourceMeta {
                eventstamps,
                latest,
                deleted_at,
            },
        })
    }

    /// Whether this resource carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.meta.deleted_at.is_some()
    }

    /// Merge another resource into this one, field by field.
    ///
    /// Pure function; the result's type and id come from `self`. For every
    /// dotted path known to either side the strictly greater stamp wins,
    /// with ties broken toward `from`. Tombstones take the greater of the
    /// two markers, and the attribute tree is rebuilt from the winning
    /// leaves.
    ///
    /// Fails with [`Error::TypeMismatch`] when the type labels differ;
    /// merging resources with different ids is outside the contract and the
    /// caller's responsibility.
    pub fn merge(&self, from: &Resource) -> Result<Resource> {
        if self.resource_type != from.resource_type {
            return Err(Error::TypeMismatch {
                expected: self.resource_type.clone(),
                got: from.resource_type.clone(),
            });
        }

        let mut eventstamps = BTreeMap::new();
        let mut leaves = Vec::new();

        let paths: std::collections::BTreeSet<&DottedPath> = self
            .meta
            .eventstamps
            .keys()
            .chain(from.meta.eventstamps.keys())
            .collect();

        for path in paths {
            let ours = self.meta.eventstamps.get(path);
            let theirs = from.meta.eventstamps.get(path);
            let (winner, stamp) = match (ours, theirs) {
                (Some(a), Some(b)) if a > b => (self, a),
                (Some(_) | None, Some(b)) => (from, b),
                (Some(a), None) => (self, a),
                (None, None) => continue,
            };

            eventstamps.insert(path.clone(), stamp.clone());

            // A path can be shadowed in the winner's materialized tree (a
            // newer write replaced its subtree), in which case the leaf
            // bytes are gone. The stamp still participates in the rebuild as
            // a ghost so its shadowing effect is preserved.
            let value = match tree::value_at(&winner.attributes, path) {
                Some(value) if !value.is_object() => Some(value.clone()),
                _ => None,
            };
            leaves.push((path.clone(), value, stamp.clone()));
        }

        let deleted_at = match (&self.meta.deleted_at, &from.meta.deleted_at) {
            (Some(a), Some(b)) => Some(a.clone().max(b.clone())),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        let latest = latest_of(&eventstamps, deleted_at.as_ref());

        Ok(Resource {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            attributes: tree::materialize(leaves),
            meta: ResourceMeta {
                eventstamps,
                latest,
                deleted_at,
            },
        })
    }

    /// Produce a tombstoned copy of this resource.
    ///
    /// A later delete with a greater stamp replaces the marker; an earlier
    /// one leaves it untouched.
    pub fn delete(&self, stamp: &Eventstamp) -> Resource {
        let deleted_at = match &self.meta.deleted_at {
            Some(existing) if existing > stamp => Some(existing.clone()),
            _ => Some(stamp.clone()),
        };
        let latest = latest_of(&self.meta.eventstamps, deleted_at.as_ref());

        Resource {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            meta: ResourceMeta {
                eventstamps: self.meta.eventstamps.clone(),
                latest,
                deleted_at,
            },
        }
    }
}

/// The greatest eventstamp across field stamps and the tombstone.
fn latest_of(
    eventstamps: &BTreeMap<DottedPath, Eventstamp>,
    deleted_at: Option<&Eventstamp>,
) -> Eventstamp {
    let mut latest = Eventstamp::min();
    for stamp in eventstamps.values() {
        if *stamp > latest {
            latest = stamp.clone();
        }
    }
    if let Some(stamp) = deleted_at {
        if *stamp > latest {
            latest = stamp.clone();
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stamp(tick: u64) -> Eventstamp {
        Eventstamp::encode(tick, 0, 0)
    }

    fn user(data: Value, tick: u64) -> Resource {
        Resource::make("users", "u1", &data, &stamp(tick), None).unwrap()
    }

    #[test]
    fn make_stamps_every_leaf() {
        let resource = user(json!({"name": "Alice", "address": {"city": "Lisbon"}}), 1000);

        assert_eq!(resource.resource_type, "users");
        assert_eq!(resource.id, "u1");
        assert_eq!(resource.meta.eventstamps.len(), 2);
        assert_eq!(resource.meta.eventstamps["name"], stamp(1000));
        assert_eq!(resource.meta.eventstamps["address.city"], stamp(1000));
        assert_eq!(resource.meta.latest, stamp(1000));
        assert!(!resource.is_deleted());
    }

    #[test]
    fn make_rejects_non_object_root() {
        let result = Resource::make("users", "u1", &json!("scalar"), &stamp(1), None);
        assert!(matches!(result, Err(Error::NotAnObject)));
    }

    #[test]
    fn make_with_tombstone_raises_latest() {
        let resource = Resource::make(
            "users",
            "u1",
            &json!({"name": "Alice"}),
            &stamp(1000),
            Some(stamp(2000)),
        )
        .unwrap();
        assert_eq!(resource.meta.latest, stamp(2000));
        assert!(resource.is_deleted());
    }

    #[test]
    fn merge_newer_field_wins() {
        let a = user(json!({"name": "Alice", "age": 30}), 1000);
        let b = user(json!({"age": 31}), 3000);

        let merged = a.merge(&b).unwrap();
        assert_eq!(
            Value::Object(merged.attributes.clone()),
            json!({"name": "Alice", "age": 31})
        );
        assert_eq!(merged.meta.eventstamps["name"], stamp(1000));
        assert_eq!(merged.meta.eventstamps["age"], stamp(3000));
        assert_eq!(merged.meta.latest, stamp(3000));
        assert_eq!(merged.meta.deleted_at, None);
    }

    #[test]
    fn merge_older_incoming_field_loses() {
        let a = user(json!({"name": "Alice"}), 2000);
        let b = user(json!({"name": "Bob"}), 1000);

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.attributes["name"], json!("Alice"));
        assert_eq!(merged.meta.latest, stamp(2000));
    }

    #[test]
    fn merge_equal_stamps_break_toward_from() {
        let a = user(json!({"name": "Alice"}), 1000);
        let b = user(json!({"name": "Bob"}), 1000);

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.attributes["name"], json!("Bob"));
    }

    #[test]
    fn merge_is_commutative_on_observable_state() {
        let a = user(json!({"name": "Alice", "age": 30}), 1000);
        let b = user(json!({"age": 31, "email": "a@example.com"}), 2000);

        let ab = a.merge(&b).unwrap();
        let ba = b.merge(&a).unwrap();
        assert_eq!(ab.attributes, ba.attributes);
        assert_eq!(ab.meta.deleted_at, ba.meta.deleted_at);
        assert_eq!(ab.meta.latest, ba.meta.latest);
    }

    #[test]
    fn merge_is_idempotent() {
        let a = user(json!({"name": "Alice", "nested": {"x": 1}}), 1000);
        let merged = a.merge(&a).unwrap();
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_preserves_shadowed_paths() {
        // One side wrote a subtree, the other later replaced it with a
        // scalar; both paths survive in the stamp map.
        let old = user(json!({"profile": {"personal": {"name": "Alice"}}}), 1000);
        let new = user(json!({"profile": {"personal": "Alice Smith"}}), 2000);

        let merged = old.merge(&new).unwrap();
        assert_eq!(
            Value::Object(merged.attributes.clone()),
            json!({"profile": {"personal": "Alice Smith"}})
        );
        assert_eq!(
            merged.meta.eventstamps["profile.personal"],
            stamp(2000)
        );
        assert_eq!(
            merged.meta.eventstamps["profile.personal.name"],
            stamp(1000)
        );

        // An even-newer write at the old sub-path wins back the subtree.
        let revived = user(json!({"profile": {"personal": {"name": "Carol"}}}), 3000);
        let merged = merged.merge(&revived).unwrap();
        assert_eq!(
            Value::Object(merged.attributes.clone()),
            json!({"profile": {"personal": {"name": "Carol"}}})
        );
    }

    #[test]
    fn merge_rejects_type_mismatch() {
        let a = user(json!({"name": "Alice"}), 1000);
        let b = Resource::make("tasks", "u1", &json!({"name": "Bob"}), &stamp(2000), None).unwrap();
        let result = a.merge(&b);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn merge_takes_greater_tombstone() {
        let a = user(json!({"name": "Alice"}), 1000).delete(&stamp(2000));
        let b = user(json!({"name": "Bob"}), 1500);

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.meta.deleted_at, Some(stamp(2000)));
        assert_eq!(merged.meta.latest, stamp(2000));

        let merged = b.merge(&a).unwrap();
        assert_eq!(merged.meta.deleted_at, Some(stamp(2000)));
    }

    #[test]
    fn deletion_survives_any_merge() {
        let deleted = user(json!({"name": "Alice"}), 1000).delete(&stamp(2000));
        let later = user(json!({"name": "Bob"}), 3000);

        let merged = deleted.merge(&later).unwrap();
        assert!(merged.is_deleted());
        // Attribute churn still merges under the tombstone.
        assert_eq!(merged.attributes["name"], json!("Bob"));
        assert_eq!(merged.meta.latest, stamp(3000));
    }

    #[test]
    fn delete_keeps_attributes_and_raises_latest() {
        let resource = user(json!({"name": "Alice"}), 1000);
        let deleted = resource.delete(&stamp(2000));

        assert_eq!(deleted.meta.deleted_at, Some(stamp(2000)));
        assert_eq!(deleted.meta.latest, stamp(2000));
        assert_eq!(deleted.attributes, resource.attributes);
    }

    #[test]
    fn earlier_delete_does_not_rewind_tombstone() {
        let resource = user(json!({"name": "Alice"}), 1000).delete(&stamp(3000));
        let redeleted = resource.delete(&stamp(2000));
        assert_eq!(redeleted.meta.deleted_at, Some(stamp(3000)));
    }

    #[test]
    fn cached_latest_matches_recomputation() {
        let a = user(json!({"name": "Alice", "x": {"y": 2}}), 1000);
        let b = user(json!({"x": {"y": 3}}), 2000);
        let merged = a.merge(&b).unwrap().delete(&stamp(2500));

        let expected = merged
            .meta
            .eventstamps
            .values()
            .chain(merged.meta.deleted_at.as_ref())
            .max()
            .cloned()
            .unwrap();
        assert_eq!(merged.meta.latest, expected);
    }

    #[test]
    fn wire_format_roundtrip() {
        let resource = user(json!({"name": "Alice", "address": {"city": "Lisbon"}}), 1000);
        let json = serde_json::to_value(&resource).unwrap();

        assert_eq!(json["type"], "users");
        assert_eq!(json["id"], "u1");
        assert!(json["meta"]["eventstamps"]["address.city"].is_string());
        assert_eq!(json["meta"]["deletedAt"], Value::Null);

        let parsed: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, resource);
    }
}
