//! # relsync testkit
//!
//! Test utilities for relsync.
//!
//! This crate provides:
//! - Blog-shaped model fixtures and an adapter over in-memory backends
//! - Helpers that write to the store the way a remote replica would
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn remote_update_reloads() {
//!     let fixture = TestAdapter::started();
//!     fixture.remote_save("post", json!({"id": "1"})).await;
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
