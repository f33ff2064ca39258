//! Synchronizable entities.

use crate::kind::EntityKind;
use crate::record::{Entity, Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Back-office manager.
    Manager,
    /// Citizen reporter using the mobile app.
    #[default]
    User,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Login email, unique.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Credential hash. Never projected into the mirror.
    #[serde(default)]
    pub password_hash: String,
    /// Platform role.
    #[serde(default)]
    pub role: Role,
    /// Whether the account is locked.
    #[serde(default)]
    pub blocked: bool,
    /// Consecutive failed logins.
    #[serde(default)]
    pub failed_login_attempts: u32,
    /// Identity-provider uid, when the account exists there too.
    #[serde(default)]
    pub firebase_uid: Option<String>,
}

impl User {
    /// Creates a citizen user with an empty credential.
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            password_hash: String::new(),
            role: Role::User,
            blocked: false,
            failed_login_attempts: 0,
            firebase_uid: None,
        }
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn unique_key(&self) -> Option<String> {
        Some(self.email.to_lowercase())
    }

    fn validate(&self) -> Result<(), String> {
        if !self.email.contains('@') {
            return Err(format!("invalid email: {:?}", self.email));
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        Ok(())
    }
}

/// Identity summary embedded in report documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Local id, when known.
    #[serde(default)]
    pub id: Option<RecordId>,
    /// Email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl UserSnapshot {
    /// Builds the snapshot of a stored user.
    pub fn of(record: &Record<User>) -> Self {
        Self {
            id: Some(record.id),
            email: Some(record.fields.email.clone()),
            name: Some(record.fields.name.clone()),
        }
    }
}

/// A contractor company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Company name, unique.
    pub name: String,
    /// Contact email.
    #[serde(default)]
    pub contact_email: Option<String>,
}

impl Entity for Company {
    const KIND: EntityKind = EntityKind::Company;

    fn unique_key(&self) -> Option<String> {
        Some(self.name.to_lowercase())
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("company name must not be empty".into());
        }
        Ok(())
    }
}

/// Company summary embedded in report documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySnapshot {
    /// Local id, when known.
    #[serde(default)]
    pub id: Option<RecordId>,
    /// Company name.
    pub name: String,
}

/// Opaque coordinate attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Report lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReportStatus {
    /// Freshly reported.
    #[default]
    #[serde(rename = "nouveau")]
    New,
    /// Works started.
    #[serde(rename = "en_cours")]
    InProgress,
    /// Works finished.
    #[serde(rename = "termine")]
    Completed,
}

impl ReportStatus {
    /// Wire code of the status.
    pub fn code(&self) -> &'static str {
        match self {
            ReportStatus::New => "nouveau",
            ReportStatus::InProgress => "en_cours",
            ReportStatus::Completed => "termine",
        }
    }

    /// Human label shown by the map and the mobile app.
    pub fn label(&self) -> &'static str {
        match self {
            ReportStatus::New => "Nouveau",
            ReportStatus::InProgress => "En cours",
            ReportStatus::Completed => "Terminé",
        }
    }

    /// Completion percentage associated with the status.
    pub fn progress(&self) -> u8 {
        match self {
            ReportStatus::New => 0,
            ReportStatus::InProgress => 50,
            ReportStatus::Completed => 100,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nouveau" | "new" => Ok(ReportStatus::New),
            "en_cours" | "in_progress" => Ok(ReportStatus::InProgress),
            "termine" | "completed" => Ok(ReportStatus::Completed),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

/// Status summary embedded in report documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Status code.
    pub code: ReportStatus,
    /// Display label.
    #[serde(default)]
    pub label: Option<String>,
    /// Completion percentage.
    #[serde(default)]
    pub progress: Option<u8>,
    /// When the status was entered.
    #[serde(default)]
    pub changed_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Builds the snapshot of a history entry.
    pub fn of(entry: &StatusHistoryEntry) -> Self {
        Self {
            code: entry.status,
            label: Some(entry.status.label().to_string()),
            progress: Some(entry.status.progress()),
            changed_at: Some(entry.changed_at),
        }
    }
}

/// A road incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Free-text description of the incident.
    pub description: String,
    /// Estimated repair budget, in ariary.
    pub budget: i64,
    /// Damaged surface in square metres.
    pub surface_m2: f64,
    /// Where the incident is.
    pub location: Location,
    /// Reporting user, when resolved locally.
    #[serde(default)]
    pub user_id: Option<RecordId>,
    /// Best-effort reporter identity when `user_id` is unresolved.
    #[serde(default)]
    pub reporter: Option<UserSnapshot>,
    /// Assigned company.
    #[serde(default)]
    pub company_id: Option<RecordId>,
    /// Mirror key of a remote-origin report.
    #[serde(default)]
    pub remote_key: Option<String>,
    /// When the incident was reported.
    pub reported_at: DateTime<Utc>,
}

impl Entity for Report {
    const KIND: EntityKind = EntityKind::Report;

    fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".into());
        }
        if self.budget < 0 {
            return Err(format!("budget must not be negative: {}", self.budget));
        }
        if !self.surface_m2.is_finite() || self.surface_m2 < 0.0 {
            return Err(format!("invalid surface: {}", self.surface_m2));
        }
        let Location {
            latitude,
            longitude,
        } = self.location;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("coordinates out of range: {latitude}, {longitude}"));
        }
        Ok(())
    }
}

/// One status transition of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// The report this transition belongs to.
    pub report_id: RecordId,
    /// Status entered.
    pub status: ReportStatus,
    /// When the transition happened.
    pub changed_at: DateTime<Utc>,
    /// Manager who made the change, if any.
    #[serde(default)]
    pub changed_by: Option<RecordId>,
    /// Mirror key of a remote-origin entry.
    #[serde(default)]
    pub remote_key: Option<String>,
}

impl Entity for StatusHistoryEntry {
    const KIND: EntityKind = EntityKind::StatusHistory;
}

/// Returns the entry defining a report's current status.
///
/// The most recent `changed_at` wins; ties go to the later insert.
pub fn current_status<'a, I>(entries: I) -> Option<&'a Record<StatusHistoryEntry>>
where
    I: IntoIterator<Item = &'a Record<StatusHistoryEntry>>,
{
    entries
        .into_iter()
        .max_by_key(|r| (r.fields.changed_at, r.id))
}

/// A platform parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter key, unique.
    pub key: String,
    /// Parameter value.
    pub value: String,
}

impl Parameter {
    /// Creates a parameter.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Entity for Parameter {
    const KIND: EntityKind = EntityKind::Parameter;

    fn unique_key(&self) -> Option<String> {
        Some(self.key.clone())
    }

    fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("parameter key must not be empty".into());
        }
        Ok(())
    }
}
