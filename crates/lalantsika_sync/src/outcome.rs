//! Results reported by passes and full syncs.

use crate::error::RecordFailure;
use lalantsika_model::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happened to one record during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Both sides now agree.
    Synced,
    /// Pulled with a best-effort reference (e.g. an unknown reporter).
    SyncedBestEffort,
    /// A remote edit lost to a dirty local record.
    KeptLocal,
    /// The local record vanished; nothing to do.
    Vanished,
    /// Left as it was, to be retried next pass.
    Failed(RecordFailure),
}

/// Aggregate counts of a completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounts {
    /// Records or documents considered.
    pub total: usize,
    /// Records confirmed on both sides.
    pub synced: usize,
    /// Records left pending for the next pass.
    pub failed: usize,
    /// Synced records carrying a best-effort reference.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unresolved: usize,
    /// Remote edits discarded in favour of local changes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub conflicts: usize,
    /// Records that disappeared mid-pass.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub vanished: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl PassCounts {
    /// Folds one record outcome into the counts.
    pub fn record(&mut self, outcome: &RecordOutcome) {
        self.total += 1;
        match outcome {
            RecordOutcome::Synced => self.synced += 1,
            RecordOutcome::SyncedBestEffort => {
                self.synced += 1;
                self.unresolved += 1;
            }
            RecordOutcome::KeptLocal => self.conflicts += 1,
            RecordOutcome::Vanished => self.vanished += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Adds another pass's counts.
    pub fn merge(&mut self, other: &PassCounts) {
        self.total += other.total;
        self.synced += other.synced;
        self.failed += other.failed;
        self.unresolved += other.unresolved;
        self.conflicts += other.conflicts;
        self.vanished += other.vanished;
    }
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The availability probe failed.
    RemoteUnavailable,
    /// The mirror answered the probe but not the pending-document query.
    QueryFailed,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassReport {
    /// Every record in the snapshot was attempted.
    Completed(PassCounts),
    /// Nothing was attempted and no local state changed.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

impl PassReport {
    /// A pass skipped because the mirror is unreachable.
    pub fn remote_unavailable() -> Self {
        PassReport::Skipped {
            reason: SkipReason::RemoteUnavailable,
        }
    }

    /// Returns the counts of a completed pass.
    pub fn counts(&self) -> Option<&PassCounts> {
        match self {
            PassReport::Completed(counts) => Some(counts),
            PassReport::Skipped { .. } => None,
        }
    }

    /// Returns true if the pass was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, PassReport::Skipped { .. })
    }

    /// Returns true if the pass ran and did not fail across the board.
    ///
    /// An empty completed pass succeeds; a pass where every record failed
    /// does not.
    pub fn is_success(&self) -> bool {
        match self {
            PassReport::Completed(c) => c.failed == 0 || c.synced > 0,
            PassReport::Skipped { .. } => false,
        }
    }

    /// Combines two passes that make up one step.
    pub fn combine(self, other: PassReport) -> PassReport {
        match (self, other) {
            (PassReport::Completed(mut a), PassReport::Completed(b)) => {
                a.merge(&b);
                PassReport::Completed(a)
            }
            (PassReport::Completed(a), PassReport::Skipped { .. })
            | (PassReport::Skipped { .. }, PassReport::Completed(a)) => PassReport::Completed(a),
            (skipped, PassReport::Skipped { .. }) => skipped,
        }
    }
}

/// Result of one step of a full sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// The step.
    pub step: crate::SyncStep,
    /// Its pass result.
    #[serde(flatten)]
    pub report: PassReport,
}

/// Result of a full sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSyncReport {
    /// Per-step results in execution order.
    pub steps: Vec<StepReport>,
    /// True if at least one step succeeded.
    pub overall: bool,
    /// False if every step was skipped for lack of a mirror.
    pub remote_available: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl FullSyncReport {
    /// Returns the report of `step`, if it ran.
    pub fn step(&self, step: crate::SyncStep) -> Option<&PassReport> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.report)
    }
}

/// Snapshot for dashboards, taken without syncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Result of the availability probe.
    pub remote_available: bool,
    /// Dirty records per entity kind.
    pub pending: BTreeMap<EntityKind, usize>,
}

impl SyncStatus {
    /// Total dirty records.
    pub fn total_pending(&self) -> usize {
        self.pending.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skipped_pass_serializes_with_reason() {
        let report = PassReport::remote_unavailable();
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"status": "skipped", "reason": "remote_unavailable"})
        );
        assert!(!report.is_success());
    }

    #[test]
    fn completed_pass_serializes_flat() {
        let mut counts = PassCounts::default();
        counts.record(&RecordOutcome::Synced);
        let report = PassReport::Completed(counts);
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"status": "completed", "total": 1, "synced": 1, "failed": 0})
        );
    }

    #[test]
    fn success_rule() {
        let all_failed = PassCounts {
            total: 2,
            failed: 2,
            ..PassCounts::default()
        };
        assert!(!PassReport::Completed(all_failed).is_success());

        let partial = PassCounts {
            total: 2,
            synced: 1,
            failed: 1,
            ..PassCounts::default()
        };
        assert!(PassReport::Completed(partial).is_success());
        assert!(PassReport::Completed(PassCounts::default()).is_success());
    }

    #[test]
    fn combine_keeps_completed_counts() {
        let a = PassReport::Completed(PassCounts {
            total: 1,
            synced: 1,
            ..PassCounts::default()
        });
        let b = PassReport::Completed(PassCounts {
            total: 2,
            failed: 2,
            ..PassCounts::default()
        });
        let combined = a.clone().combine(b).counts().copied().unwrap();
        assert_eq!((combined.total, combined.synced, combined.failed), (3, 1, 2));

        assert_eq!(a.clone().combine(PassReport::remote_unavailable()), a);
        assert!(PassReport::remote_unavailable()
            .combine(PassReport::remote_unavailable())
            .is_skipped());
    }
}
