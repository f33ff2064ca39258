//! # Lalantsika Model
//!
//! Entity types shared by the Lalantsika sync core.
//!
//! This crate provides:
//! - The synchronizable entities (users, companies, road reports,
//!   status history, parameters)
//! - The [`Record`] envelope carrying the `synchronized` / `last_sync_at`
//!   sync-control attributes
//! - The [`Entity`] trait binding an entity to its [`EntityKind`]
//! - The mirror [`Document`] shape
//!
//! ## Key Invariants
//!
//! - The relational record is the source of truth; mirror documents are
//!   derived copies
//! - A report's current status is derived from its status history, never
//!   stored on the report itself
//! - Credentials never leave the record (see [`User::password_hash`])

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod entities;
mod kind;
mod record;

pub use document::{fields, Document};
pub use entities::{
    current_status, Company, CompanySnapshot, Location, Parameter, Report, ReportStatus, Role,
    StatusHistoryEntry, StatusSnapshot, User, UserSnapshot,
};
pub use kind::{EntityKind, UnknownKind};
pub use record::{Entity, Record, RecordId};
