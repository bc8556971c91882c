//! # relsync core
//!
//! Building blocks shared by the relsync adapter and its stores.
//!
//! This crate provides:
//! - Document identifiers that pack `(type, natural id)` into one key
//! - Change notifications, subscription options and a broadcast change feed
//! - Relational schema entries and payload types
//! - The [`RelationalStore`] contract and an in-memory implementation
//!
//! ## Key Invariants
//!
//! - Encoding a [`DocumentId`] is total; parsing is its partial left-inverse
//! - Change notifications are delivered in sequence order
//! - Cancelling a subscription is idempotent

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod doc_id;
mod error;
mod memory;
mod payload;
mod schema;
mod store;

pub use change_feed::{ChangeFeed, ChangeNotification, ChangeSubscription, ChangesOptions, Since};
pub use doc_id::{type_prefix, DocumentId};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use payload::{DeleteResult, Payload, Revision, SaveResult, ID_FIELD, REV_FIELD};
pub use schema::{classify, pluralize, RelationDef, RelationOptions, SchemaEntry};
pub use store::RelationalStore;
