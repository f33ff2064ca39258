//! # Lalantsika Sync
//!
//! Bidirectional reconciliation between the relational record store and
//! the remote document mirror.
//!
//! This crate provides:
//! - [`SyncEngine`]: one-directional passes per entity kind
//!   (local → remote pushes, remote → local pulls)
//! - [`SyncCoordinator`]: the fixed full-sync sequence, single steps and
//!   status introspection
//! - Mirror document projection for every entity kind
//! - Per-record retry with exponential backoff
//!
//! ## Architecture
//!
//! Local durability comes first: a mutation is committed to the record
//! store, flagged dirty, and only then written to the mirror. A full sync
//! runs four passes in order:
//! 1. Push users
//! 2. Pull reports and their status history written by the mobile app
//! 3. Push status history, republishing each report's current status
//! 4. Push parameters
//!
//! ## Key Invariants
//!
//! - A record becomes clean only after the mirror confirms its write, and
//!   only if it did not change meanwhile
//! - One record's failure never aborts its batch
//! - An unavailable mirror skips a pass without touching local state
//! - Pulls are idempotent: a pulled document is acknowledged with its local
//!   id, and natural keys prevent duplicates if the acknowledgement is lost
//! - Only a record store failure is fatal

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod engine;
mod error;
mod outcome;
pub mod projection;

pub use config::{Collections, ConflictPolicy, RetryConfig, SyncConfig};
pub use coordinator::{SyncCoordinator, SyncStats, SyncStep};
pub use engine::{DeleteOutcome, Stores, SyncEngine};
pub use error::{RecordFailure, SyncError, SyncResult};
pub use outcome::{
    FullSyncReport, PassCounts, PassReport, RecordOutcome, SkipReason, StepReport, SyncStatus,
};
