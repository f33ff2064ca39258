//! Mirror document shape.

/// A mirror document: a JSON object stored under `collection/key`.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field names with sync meaning inside mirror documents.
pub mod fields {
    /// Local numeric id; absent on remote-origin documents until pulled.
    pub const ID: &str = "id";
    /// `true` once the document has a local counterpart matching it.
    pub const SYNCHRONIZED: &str = "synchronized";
    /// Timestamp of the last successful mirror write or read.
    pub const LAST_SYNC_AT: &str = "last_sync_at";
}
