//! Entity and mirror document builders.

use chrono::{DateTime, TimeZone, Utc};
use lalantsika_model::{
    Company, Document, Location, Parameter, RecordId, Report, ReportStatus, StatusHistoryEntry,
    User,
};
use serde_json::json;

/// A fixed instant, so tests do not depend on the clock.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid fixed time")
}

/// Antananarivo city centre.
pub fn tana() -> Location {
    Location {
        latitude: -18.8792,
        longitude: 47.5079,
    }
}

/// A citizen user named after the local part of `email`.
pub fn user(email: &str) -> User {
    let name = email.split('@').next().unwrap_or(email);
    User::new(email, name)
}

/// A contractor company.
pub fn company(name: &str) -> Company {
    Company {
        name: name.to_string(),
        contact_email: None,
    }
}

/// A report in Antananarivo with no owner.
pub fn report(description: &str, budget: i64) -> Report {
    Report {
        description: description.to_string(),
        budget,
        surface_m2: 12.5,
        location: tana(),
        user_id: None,
        reporter: None,
        company_id: None,
        remote_key: None,
        reported_at: fixed_time(),
    }
}

/// A pothole report costing 500 000 ariary.
pub fn pothole() -> Report {
    report("pothole", 500_000)
}

/// A status transition of `report_id` at `fixed_time() + minutes`.
pub fn status_entry(report_id: RecordId, status: ReportStatus, minutes: i64) -> StatusHistoryEntry {
    StatusHistoryEntry {
        report_id,
        status,
        changed_at: fixed_time() + chrono::Duration::minutes(minutes),
        changed_by: None,
        remote_key: None,
    }
}

/// A platform parameter.
pub fn parameter(key: &str, value: &str) -> Parameter {
    Parameter::new(key, value)
}

/// A report document as the mobile app writes it: no local id and
/// `synchronized: false`.
pub fn mobile_report_doc(description: &str, email: &str) -> Document {
    into_document(json!({
        "description": description,
        "budget": "150000",
        "surface": 4.0,
        "latitude": -18.91,
        "longitude": 47.52,
        "user": { "email": email },
        "status": "nouveau",
        "reported_at": 1_740_819_600_000_i64,
        "synchronized": false,
    }))
}

/// A status transition document as the mobile app writes it.
pub fn mobile_status_doc(report_key: &str, status: ReportStatus) -> Document {
    into_document(json!({
        "report_key": report_key,
        "status": status.code(),
        "changed_at": "2025-03-02T10:00:00.000Z",
        "synchronized": false,
    }))
}

/// Unwraps a JSON object literal.
pub fn into_document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lalantsika_model::Entity;

    #[test]
    fn built_entities_are_valid() {
        assert!(user("a@b.com").validate().is_ok());
        assert!(pothole().validate().is_ok());
        assert!(company("Colas").validate().is_ok());
    }

    #[test]
    fn mobile_documents_are_pending() {
        let doc = mobile_report_doc("crack", "a@b.com");
        assert_eq!(doc["synchronized"], json!(false));
        assert!(doc.get("id").is_none());
    }
}
