//! # Roost Engine
//!
//! An embedded, schema-validated, local-first document database.
//!
//! The core is a state-based CRDT with field-level last-write-wins
//! semantics: every leaf of a resource's attribute tree carries the
//! eventstamp of its last write, and replicas that observe the same set of
//! updates converge to the same state regardless of order or duplication.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform;
//!   persistence and sync live behind the plugin surface
//! - **Convergent**: resource and document merges are commutative,
//!   associative and idempotent over observable state
//! - **Single-threaded**: one logical actor; asynchrony appears only at the
//!   plugin boundary
//!
//! ## Core Concepts
//!
//! ### Eventstamps and the clock
//!
//! An [`Eventstamp`] is a fixed-grammar string
//! (`YYYY-MM-DDTHH:MM:SS.mmmZ|CCCC|NNNN`) that orders byte-wise. The
//! [`Clock`] is a hybrid logical clock: strictly monotonic locally, and able
//! to absorb remote stamps via [`Clock::forward`] so the next local write
//! dominates everything already seen.
//!
//! ### Resources and documents
//!
//! A [`Resource`] pairs an attribute tree with a flat map from dotted leaf
//! path to eventstamp, plus a tombstone. [`Resource::merge`] resolves each
//! field independently toward the greater stamp. A [`Document`] bundles
//! resources for exchange between replicas; [`Document::merge`] classifies
//! what changed as added, updated or deleted.
//!
//! ### Collections, transactions and plugins
//!
//! A [`Collection`] validates values through its schema, stamps writes with
//! the database's shared clock and emits batched mutation events. A
//! [`Database`] wires collections together, runs snapshot-isolated
//! transactions via [`Database::begin`], and drives the [`Plugin`]
//! lifecycle.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use roost_engine::{
//!     CollectionConfig, CollectionSchema, Database, DatabaseConfig, FieldDef, FieldType,
//! };
//! use serde_json::json;
//!
//! // 1. Describe the collections
//! let tasks = CollectionSchema::new(vec![
//!     FieldDef::required("id", FieldType::String),
//!     FieldDef::required("title", FieldType::String),
//!     FieldDef::optional("completed", FieldType::Bool),
//! ]);
//!
//! // 2. Assemble the database
//! let config = DatabaseConfig::new("todo", 1)
//!     .with_collection("tasks", CollectionConfig::new(Arc::new(tasks)));
//! let mut db = Database::new(config);
//!
//! // 3. Write and read
//! db.collection_mut("tasks").unwrap()
//!     .add(&json!({"id": "t1", "title": "water the plants"}))
//!     .unwrap();
//! let task = db.collection("tasks").unwrap().get("t1").unwrap();
//! assert_eq!(task["title"], "water the plants");
//!
//! // 4. Transactions stage writes and emit one batched event at commit
//! db.begin(|tx| {
//!     tx.collection("tasks")?.add(&json!({"id": "t2", "title": "buy seeds"}))?;
//!     tx.collection("tasks")?.update("t1", &json!({"completed": true}))?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! // 5. Everything exports as documents for persistence or sync
//! let documents = db.to_documents();
//! assert_eq!(documents["tasks"].data.len(), 2);
//! ```

pub mod clock;
pub mod collection;
pub mod database;
pub mod document;
pub mod error;
pub mod events;
pub mod eventstamp;
pub mod plugin;
pub mod resource;
pub mod schema;
pub mod transaction;
pub mod tree;

// Re-export main types at crate root
pub use clock::{Clock, NonceSource, RandomNonce, SharedClock, TimeSource, WallClock};
pub use collection::{Collection, CollectionConfig, GetId, QueryBuilder};
pub use database::{Database, DatabaseConfig, DatabaseEvent};
pub use document::{ChangeSet, Document, DocumentMeta, JsonApi, JSONAPI_VERSION};
pub use error::{Error, Result};
pub use events::{Added, EventBus, MutationEvent, Removed, SubscriptionId, Updated};
pub use eventstamp::{Eventstamp, COUNTER_MAX, COUNTER_WIDTH};
pub use plugin::Plugin;
pub use resource::{Resource, ResourceMeta};
pub use schema::{CollectionSchema, FieldDef, FieldType, Issue, Issues, Validator};
pub use transaction::{Transaction, TxCollection};
pub use tree::Attributes;

/// Type aliases for clarity
pub type ResourceId = String;
pub type CollectionName = String;
pub type DottedPath = String;
