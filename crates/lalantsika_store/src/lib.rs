//! # Lalantsika Store
//!
//! The relational record store as seen by the sync core.
//!
//! The sync core does not depend on a SQL dialect. It consumes a small
//! typed CRUD contract per entity kind ([`RecordStore`]) and relies on
//! every table carrying the `synchronized` / `last_sync_at` columns.
//!
//! ## Design Principles
//!
//! - Every local mutation forces `synchronized = false` in the same write
//! - `synchronized = true` is only ever set by [`RecordStore::mark_synchronized`]
//! - Deletes and sync marks are idempotent, so retries are safe
//! - Stores must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - For tests and ephemeral runs
//! - [`JsonFileStore`] - One JSON file per table, written through on every mutation
//!
//! ## Example
//!
//! ```rust
//! use lalantsika_model::Parameter;
//! use lalantsika_store::{MemoryStore, RecordStore};
//!
//! let store = MemoryStore::<Parameter>::new();
//! let record = store.create(Parameter::new("max_login_attempts", "3")).unwrap();
//! assert!(!record.synchronized);
//! assert_eq!(store.find_unsynchronized().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;
mod table;

pub use error::{StoreError, StoreResult};
pub use file::{DirLock, JsonFileStore};
pub use memory::MemoryStore;
pub use store::RecordStore;
