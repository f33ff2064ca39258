//! # Lalantsika Testkit
//!
//! Test utilities for the Lalantsika sync core.
//!
//! This crate provides:
//! - Harnesses wiring in-memory stores and a fault-injecting mirror
//! - On-disk fixtures for the JSON file store and directory mirror
//! - Builders for entities and mobile-app documents
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lalantsika_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_a_user() {
//!     let harness = TestHarness::new();
//!     harness.users.create(user("a@b.com")).unwrap();
//!     let report = harness.engine().push_users().unwrap();
//!     assert_eq!(report.counts().unwrap().synced, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod builders;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builders::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use builders::*;
pub use fixtures::*;
pub use generators::*;
