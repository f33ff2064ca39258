//! Mirror document projection and parsing.
//!
//! Local records are projected into self-contained documents: public
//! fields only, with the related entities the mirror denormalizes
//! (reporter identity, company, current status) embedded as snapshots.
//! Remote-origin documents written by the mobile app are parsed leniently
//! back into entity fields.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use lalantsika_model::{
    fields, Company, CompanySnapshot, Document, Location, Parameter, Record, RecordId, Report,
    ReportStatus, StatusHistoryEntry, StatusSnapshot, User, UserSnapshot,
};
use serde::Serialize;
use serde_json::{json, Value};

/// Related entities embedded in a report document.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    /// Reporter identity, refreshed from the users table when resolvable.
    pub reporter: Option<UserSnapshot>,
    /// Assigned company.
    pub company: Option<CompanySnapshot>,
    /// Current status derived from the history.
    pub status: StatusSnapshot,
}

/// Status of a report with no history yet.
pub fn initial_status() -> StatusSnapshot {
    let status = ReportStatus::New;
    StatusSnapshot {
        code: status,
        label: Some(status.label().to_string()),
        progress: Some(status.progress()),
        changed_at: None,
    }
}

/// Mirror key of a report: the mobile key for remote-origin reports,
/// the numeric id otherwise.
pub fn report_key(record: &Record<Report>) -> String {
    record
        .fields
        .remote_key
        .clone()
        .unwrap_or_else(|| record.id.to_string())
}

/// Mirror key of a status history entry.
pub fn history_key(record: &Record<StatusHistoryEntry>) -> String {
    record
        .fields
        .remote_key
        .clone()
        .unwrap_or_else(|| record.id.to_string())
}

/// Formats a timestamp the way documents carry it.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// The write-back patch marking a document as having a local counterpart.
pub fn sync_ack(id: RecordId, at: DateTime<Utc>) -> Document {
    let mut doc = Document::new();
    stamp(&mut doc, id, at);
    doc
}

fn stamp(doc: &mut Document, id: RecordId, at: DateTime<Utc>) {
    doc.insert(fields::ID.into(), json!(id.get()));
    doc.insert(fields::SYNCHRONIZED.into(), Value::Bool(true));
    doc.insert(fields::LAST_SYNC_AT.into(), timestamp(at));
}

/// Serializes a snapshot, dropping absent fields.
fn compact<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => {
            Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect())
        }
        Ok(other) => other,
        Err(_) => Value::Null,
    }
}

/// Projects a user. The password hash and login counters stay local.
pub fn user_document(record: &Record<User>, at: DateTime<Utc>) -> Document {
    let user = &record.fields;
    let mut doc = Document::new();
    doc.insert("email".into(), json!(user.email));
    doc.insert("name".into(), json!(user.name));
    doc.insert("role".into(), compact(&user.role));
    doc.insert("blocked".into(), json!(user.blocked));
    if let Some(uid) = &user.firebase_uid {
        doc.insert("firebase_uid".into(), json!(uid));
    }
    stamp(&mut doc, record.id, at);
    doc
}

/// Projects a company.
pub fn company_document(record: &Record<Company>, at: DateTime<Utc>) -> Document {
    let mut doc = Document::new();
    doc.insert("name".into(), json!(record.fields.name));
    if let Some(email) = &record.fields.contact_email {
        doc.insert("contact_email".into(), json!(email));
    }
    stamp(&mut doc, record.id, at);
    doc
}

/// Projects a parameter.
pub fn parameter_document(record: &Record<Parameter>, at: DateTime<Utc>) -> Document {
    let mut doc = Document::new();
    doc.insert("key".into(), json!(record.fields.key));
    doc.insert("value".into(), json!(record.fields.value));
    stamp(&mut doc, record.id, at);
    doc
}

/// Projects a report with its denormalized context.
pub fn report_document(
    record: &Record<Report>,
    context: &ReportContext,
    at: DateTime<Utc>,
) -> Document {
    let report = &record.fields;
    let mut doc = Document::new();
    doc.insert("description".into(), json!(report.description));
    doc.insert("budget".into(), json!(report.budget));
    doc.insert("surface_m2".into(), json!(report.surface_m2));
    doc.insert("latitude".into(), json!(report.location.latitude));
    doc.insert("longitude".into(), json!(report.location.longitude));
    doc.insert("reported_at".into(), timestamp(report.reported_at));
    if let Some(reporter) = &context.reporter {
        doc.insert("user".into(), compact(reporter));
    }
    if let Some(company) = &context.company {
        doc.insert("company".into(), compact(company));
    }
    doc.extend(status_patch(&context.status));
    stamp(&mut doc, record.id, at);
    doc
}

/// The fields of a report document that follow its current status.
pub fn status_patch(status: &StatusSnapshot) -> Document {
    let mut doc = Document::new();
    doc.insert("status".into(), compact(status));
    doc.insert(
        "progress".into(),
        json!(status.progress.unwrap_or_else(|| status.code.progress())),
    );
    doc
}

/// Projects a status history entry, linked to its report's mirror key.
pub fn history_document(
    record: &Record<StatusHistoryEntry>,
    report_key: &str,
    at: DateTime<Utc>,
) -> Document {
    let entry = &record.fields;
    let mut doc = Document::new();
    doc.insert("report_id".into(), json!(entry.report_id.get()));
    doc.insert("report_key".into(), json!(report_key));
    doc.insert("status".into(), json!(entry.status.code()));
    doc.insert("label".into(), json!(entry.status.label()));
    doc.insert("progress".into(), json!(entry.status.progress()));
    doc.insert("changed_at".into(), timestamp(entry.changed_at));
    if let Some(by) = entry.changed_by {
        doc.insert("changed_by".into(), json!(by.get()));
    }
    stamp(&mut doc, record.id, at);
    doc
}

/// Local id written back into a document, if any.
pub fn local_id(doc: &Document) -> Option<RecordId> {
    doc.get(fields::ID).and_then(id_value)
}

/// Field queries that together select every pending document: explicit
/// `synchronized: false`, no `synchronized` flag, or no local id.
pub fn pending_queries() -> [(&'static str, Value); 3] {
    [
        (fields::SYNCHRONIZED, Value::Bool(false)),
        (fields::SYNCHRONIZED, Value::Null),
        (fields::ID, Value::Null),
    ]
}

/// True if a document still waits for a local counterpart or carries an
/// unacknowledged remote edit.
pub fn is_pending(doc: &Document) -> bool {
    doc.get(fields::SYNCHRONIZED) != Some(&Value::Bool(true)) || local_id(doc).is_none()
}

fn id_value(value: &Value) -> Option<RecordId> {
    match value {
        Value::Number(n) => n.as_u64().map(RecordId),
        Value::String(s) => s.trim().parse().ok().map(RecordId),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(doc: &Document, field: &str) -> Option<String> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts RFC 3339 strings and millisecond epochs (`Date.now()`).
fn time(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp {s:?}: {e}")),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| format!("invalid timestamp {n}")),
        other => Err(format!("invalid timestamp {other}")),
    }
}

fn optional_time(doc: &Document, field: &str) -> Result<Option<DateTime<Utc>>, String> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => time(value).map(Some),
    }
}

/// Status as a bare code or as an embedded snapshot.
fn status(value: Option<&Value>) -> Result<Option<ReportStatus>, String> {
    let code = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(code)) => code.as_str(),
        Some(Value::Object(snapshot)) => snapshot
            .get("code")
            .and_then(Value::as_str)
            .ok_or("status snapshot without code")?,
        Some(other) => return Err(format!("invalid status {other}")),
    };
    code.parse().map(Some)
}

fn user_snapshot(value: &Value) -> Option<UserSnapshot> {
    let map = value.as_object()?;
    let snapshot = UserSnapshot {
        id: map.get("id").and_then(id_value),
        email: text(map, "email"),
        name: text(map, "name"),
    };
    (snapshot.id.is_some() || snapshot.email.is_some()).then_some(snapshot)
}

/// Reference to a company embedded in a remote document.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRef {
    /// Local id, if known.
    pub id: Option<RecordId>,
    /// Company name.
    pub name: Option<String>,
}

fn company_ref(value: &Value) -> Option<CompanyRef> {
    let map = value.as_object()?;
    let company = CompanyRef {
        id: map.get("id").and_then(id_value),
        name: text(map, "name"),
    };
    (company.id.is_some() || company.name.is_some()).then_some(company)
}

/// A report as written by the mobile app.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReport {
    /// Free-text description.
    pub description: String,
    /// Estimated budget; 0 when absent.
    pub budget: i64,
    /// Affected surface; 0 when absent.
    pub surface_m2: f64,
    /// Coordinates.
    pub location: Location,
    /// Embedded reporter identity.
    pub reporter: Option<UserSnapshot>,
    /// Embedded company reference.
    pub company: Option<CompanyRef>,
    /// Status the app created the report with.
    pub status: ReportStatus,
    /// Creation time on the device.
    pub reported_at: Option<DateTime<Utc>>,
}

impl RemoteReport {
    /// Builds the local fields of a remote-origin report.
    pub fn into_report(
        self,
        remote_key: &str,
        user_id: Option<RecordId>,
        reporter: Option<UserSnapshot>,
        company_id: Option<RecordId>,
        now: DateTime<Utc>,
    ) -> Report {
        Report {
            description: self.description,
            budget: self.budget,
            surface_m2: self.surface_m2,
            location: self.location,
            user_id,
            reporter,
            company_id,
            remote_key: Some(remote_key.to_string()),
            reported_at: self.reported_at.unwrap_or(now),
        }
    }

    /// Applies a remote edit to existing local fields. Ownership, company
    /// and status stay local.
    pub fn apply_to(self, local: &Report) -> Report {
        Report {
            description: self.description,
            budget: self.budget,
            surface_m2: self.surface_m2,
            location: self.location,
            reported_at: self.reported_at.unwrap_or(local.reported_at),
            ..local.clone()
        }
    }
}

/// Parses a report document.
///
/// # Errors
///
/// Returns a reason when the description or coordinates are missing or a
/// field has the wrong type.
pub fn parse_report(doc: &Document) -> Result<RemoteReport, String> {
    let description = text(doc, "description").ok_or("missing description")?;

    let budget = match doc.get("budget") {
        None | Some(Value::Null) => 0,
        Some(value) => number(value)
            .map(|b| b.round() as i64)
            .ok_or_else(|| format!("invalid budget {value}"))?,
    };

    let surface_m2 = match doc.get("surface_m2").or_else(|| doc.get("surface")) {
        None | Some(Value::Null) => 0.0,
        Some(value) => number(value).ok_or_else(|| format!("invalid surface {value}"))?,
    };

    let coords = doc
        .get("location")
        .and_then(Value::as_object)
        .unwrap_or(doc);
    let latitude = coords.get("latitude").and_then(number);
    let longitude = coords.get("longitude").and_then(number);
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return Err("missing coordinates".into());
    };

    Ok(RemoteReport {
        description,
        budget,
        surface_m2,
        location: Location {
            latitude,
            longitude,
        },
        reporter: doc.get("user").and_then(user_snapshot),
        company: doc.get("company").and_then(company_ref),
        status: status(doc.get("status"))?.unwrap_or_default(),
        reported_at: optional_time(doc, "reported_at")?,
    })
}

/// How a remote history entry names its report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportRef {
    /// Local numeric id.
    Id(RecordId),
    /// Mirror key of the report document.
    Key(String),
}

/// A status transition as written by the mobile app or the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHistory {
    /// The report this entry belongs to.
    pub report: ReportRef,
    /// New status.
    pub status: ReportStatus,
    /// Transition time.
    pub changed_at: Option<DateTime<Utc>>,
    /// Who made the change.
    pub changed_by: Option<RecordId>,
}

/// Parses a status history document.
///
/// # Errors
///
/// Returns a reason when the report reference or status is missing or
/// malformed.
pub fn parse_history(doc: &Document) -> Result<RemoteHistory, String> {
    let report = match (doc.get("report_id").and_then(id_value), text(doc, "report_key")) {
        (Some(id), _) => ReportRef::Id(id),
        (None, Some(key)) => ReportRef::Key(key),
        (None, None) => return Err("missing report reference".into()),
    };
    let status = status(doc.get("status"))?.ok_or("missing status")?;
    Ok(RemoteHistory {
        report,
        status,
        changed_at: optional_time(doc, "changed_at")?,
        changed_by: doc.get("changed_by").and_then(id_value),
    })
}
