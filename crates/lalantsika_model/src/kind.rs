//! Entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of synchronizable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Platform users (managers and citizens).
    User,
    /// Contractor companies assigned to reports.
    Company,
    /// Road incident reports ("signalements").
    Report,
    /// Report status transitions ("histo_statut").
    StatusHistory,
    /// Platform parameters.
    Parameter,
}

impl EntityKind {
    /// Every kind, in a stable order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::User,
        EntityKind::Company,
        EntityKind::Report,
        EntityKind::StatusHistory,
        EntityKind::Parameter,
    ];

    /// Returns the snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Company => "company",
            EntityKind::Report => "report",
            EntityKind::StatusHistory => "status_history",
            EntityKind::Parameter => "parameter",
        }
    }

    /// Position of the kind in [`EntityKind::ALL`].
    pub fn index(&self) -> usize {
        match self {
            EntityKind::User => 0,
            EntityKind::Company => 1,
            EntityKind::Report => 2,
            EntityKind::StatusHistory => 3,
            EntityKind::Parameter => 4,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity kind: {}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "users" => Ok(EntityKind::User),
            "company" | "companies" => Ok(EntityKind::Company),
            "report" | "reports" => Ok(EntityKind::Report),
            "status_history" | "history" => Ok(EntityKind::StatusHistory),
            "parameter" | "parameters" => Ok(EntityKind::Parameter),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn parse_accepts_plural_names() {
        assert_eq!("reports".parse::<EntityKind>().unwrap(), EntityKind::Report);
        assert_eq!("history".parse::<EntityKind>().unwrap(), EntityKind::StatusHistory);
        assert!("photos".parse::<EntityKind>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&EntityKind::StatusHistory).unwrap();
        assert_eq!(json, "\"status_history\"");
    }
}
