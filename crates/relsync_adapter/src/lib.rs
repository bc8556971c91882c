//! # relsync adapter
//!
//! Keeps an application object cache consistent with a replicating
//! relational document store.
//!
//! This crate provides:
//! - A change-feed listener that runs for the adapter's lifetime
//! - A classifier that drops design documents and unknown types
//! - A reconciliation policy that reloads or unloads clean cached records
//! - A CRUD façade that registers models lazily and pushes the schema
//! - The [`ObjectCache`] contract and an in-memory cache
//!
//! ## Flow
//!
//! ```text
//! store.changes() ──> ChangeFeedListener ──> ChangeClassifier ──> ReconciliationPolicy ──> ObjectCache
//! ```
//!
//! ## Key Invariants
//!
//! - Dirty or not-yet-loaded records are never touched by remote changes
//! - A deleted document unloads its record exactly once and never reloads it
//! - Notifications for foreign ids or unknown types make no cache calls
//! - `stop` is idempotent and safe before `start`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cache;
mod classifier;
mod config;
mod error;
mod listener;
mod policy;
mod registry;

pub use adapter::{Adapter, AdapterBuilder, RecordSnapshot};
pub use cache::{
    CacheCall, CacheError, CacheResult, CachedRecord, MemoryObjectCache, MemoryRecord,
    ModelSchema, ObjectCache, RecordLoader, Relationship, RelationshipKind,
    DEFAULT_CALL_LOG_LIMIT,
};
pub use classifier::{ChangeClassifier, ClassifiedChange, Classification, IgnoreReason};
pub use config::AdapterConfig;
pub use error::{AdapterError, AdapterResult};
pub use listener::{ChangeFeedListener, ListenerState, ListenerStats};
pub use policy::{Decision, Reconciliation, ReconciliationPolicy, SkipReason};
pub use registry::SchemaRegistry;
