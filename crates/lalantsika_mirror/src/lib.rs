//! # Lalantsika Mirror
//!
//! The remote document store as seen by the sync core.
//!
//! The mirror is an offline-capable, eventually-consistent copy of the
//! relational store, read by the mobile app and the public map. The sync
//! core talks to it only through [`RemoteMirror`]: collection-scoped
//! get/put/patch/delete, field lookups and an availability probe.
//!
//! ## Design Principles
//!
//! - Every operation is total: connectivity, auth and quota failures come
//!   back as [`RemoteError`] values, never panics, and no SDK error type
//!   leaks out of a backend
//! - [`RemoteMirror::is_available`] never fails; it folds every error into `false`
//! - Deletes are idempotent: deleting an absent document succeeds
//!
//! ## Available Backends
//!
//! - [`MemoryMirror`] - For testing, with fault injection
//! - [`RestMirror`] - Realtime Database REST API over a pluggable [`HttpClient`]
//! - [`DirMirror`] - JSON documents in a directory tree
//! - [`TimeoutMirror`] - Wrapper bounding every call by a timeout

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod memory;
mod mirror;
mod rest;
mod timeout;

pub use dir::DirMirror;
pub use error::{RemoteError, RemoteResult};
pub use memory::MemoryMirror;
pub use mirror::{KeyedDocument, RemoteMirror};
pub use rest::{HttpClient, HttpFailure, HttpMethod, HttpRequest, HttpResponse, RestMirror};
pub use timeout::TimeoutMirror;
