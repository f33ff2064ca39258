//! Full sync sequencing and status reporting.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::outcome::{FullSyncReport, PassReport, SkipReason, StepReport, SyncStatus};
use chrono::{DateTime, Utc};
use lalantsika_mirror::RemoteMirror;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// A single reconciliation step the coordinator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    /// Local to remote: users.
    PushUsers,
    /// Remote to local: reports, then their status history.
    PullReports,
    /// Local to remote: status history, republishing report status, then
    /// any report still dirty.
    PushStatusHistory,
    /// Local to remote: parameters.
    PushParameters,
    /// Local to remote: reports. Not part of a full sync.
    PushReports,
    /// Local to remote: companies. Not part of a full sync.
    PushCompanies,
}

impl SyncStep {
    /// The fixed full-sync sequence. Remote-origin reports and history land
    /// locally before history is pushed back out with derived status.
    pub const FULL_SYNC: [SyncStep; 4] = [
        SyncStep::PushUsers,
        SyncStep::PullReports,
        SyncStep::PushStatusHistory,
        SyncStep::PushParameters,
    ];

    /// Every step.
    pub const ALL: [SyncStep; 6] = [
        SyncStep::PushUsers,
        SyncStep::PullReports,
        SyncStep::PushStatusHistory,
        SyncStep::PushParameters,
        SyncStep::PushReports,
        SyncStep::PushCompanies,
    ];

    /// Returns the snake_case name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::PushUsers => "push_users",
            SyncStep::PullReports => "pull_reports",
            SyncStep::PushStatusHistory => "push_status_history",
            SyncStep::PushParameters => "push_parameters",
            SyncStep::PushReports => "push_reports",
            SyncStep::PushCompanies => "push_companies",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStep {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        SyncStep::ALL
            .into_iter()
            .find(|step| step.as_str() == normalized)
            .ok_or_else(|| SyncError::Config(format!("unknown sync step: {s}")))
    }
}

/// Cumulative statistics across coordinator runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Full syncs completed without a fatal error.
    pub full_syncs: u64,
    /// Steps run, full syncs included.
    pub steps_run: u64,
    /// Steps skipped for lack of a mirror.
    pub steps_skipped: u64,
    /// Records confirmed on both sides.
    pub records_synced: u64,
    /// Records left pending.
    pub records_failed: u64,
    /// Remote edits discarded in favour of local changes.
    pub conflicts: u64,
    /// End of the last full sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Last fatal error.
    pub last_error: Option<String>,
}

/// Externally triggered orchestration of the sync passes.
///
/// There is no background scheduler: callers (an HTTP endpoint, a cron job,
/// the CLI) decide the cadence. Every entry point is safe to call while a
/// previous invocation's effects are still settling; passes for the same
/// kind wait for each other.
///
/// # Example
///
/// ```rust
/// use lalantsika_mirror::MemoryMirror;
/// use lalantsika_model::User;
/// use lalantsika_store::RecordStore;
/// use lalantsika_sync::{Stores, SyncConfig, SyncCoordinator, SyncEngine};
///
/// let stores = Stores::in_memory();
/// stores.users.create(User::new("a@b.com", "Rakoto")).unwrap();
///
/// let engine = SyncEngine::new(SyncConfig::default(), stores, MemoryMirror::new());
/// let coordinator = SyncCoordinator::new(engine);
///
/// let report = coordinator.run_full_sync().unwrap();
/// assert!(report.overall);
/// assert_eq!(coordinator.get_sync_status().unwrap().total_pending(), 0);
/// ```
pub struct SyncCoordinator<M: RemoteMirror> {
    engine: SyncEngine<M>,
    stats: RwLock<SyncStats>,
}

impl<M: RemoteMirror> SyncCoordinator<M> {
    /// Creates a coordinator around `engine`.
    pub fn new(engine: SyncEngine<M>) -> Self {
        Self {
            engine,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the engine.
    pub fn engine(&self) -> &SyncEngine<M> {
        &self.engine
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs [`SyncStep::FULL_SYNC`] in order.
    ///
    /// A skipped or failed step never blocks the next one. The run is
    /// `overall` successful if at least one step succeeded; a permanently
    /// offline mirror yields `overall: false` and `remote_available: false`
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails, aborting the remaining steps.
    pub fn run_full_sync(&self) -> SyncResult<FullSyncReport> {
        let start = Instant::now();
        let mut steps = Vec::with_capacity(SyncStep::FULL_SYNC.len());
        for step in SyncStep::FULL_SYNC {
            let report = self.run_step(step)?;
            steps.push(StepReport { step, report });
        }

        let overall = steps.iter().any(|s| s.report.is_success());
        let remote_available = steps.iter().any(|s| {
            s.report
                != PassReport::Skipped {
                    reason: SkipReason::RemoteUnavailable,
                }
        });
        let report = FullSyncReport {
            steps,
            overall,
            remote_available,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        {
            let mut stats = self.stats.write();
            stats.full_syncs += 1;
            stats.last_sync_at = Some(Utc::now());
        }
        tracing::info!(
            overall,
            remote_available,
            duration_ms = report.duration_ms,
            "full sync finished"
        );
        Ok(report)
    }

    /// Runs one step.
    ///
    /// # Errors
    ///
    /// Fails only if the record store fails.
    pub fn run_step(&self, step: SyncStep) -> SyncResult<PassReport> {
        tracing::debug!(%step, "running sync step");
        let result = match step {
            SyncStep::PushUsers => self.engine.push_users(),
            SyncStep::PullReports => self.pull_reports_and_history(),
            SyncStep::PushStatusHistory => self.push_history_and_reports(),
            SyncStep::PushParameters => self.engine.push_parameters(),
            SyncStep::PushReports => self.engine.push_reports(),
            SyncStep::PushCompanies => self.engine.push_companies(),
        };

        let mut stats = self.stats.write();
        stats.steps_run += 1;
        match &result {
            Ok(PassReport::Completed(counts)) => {
                stats.records_synced += counts.synced as u64;
                stats.records_failed += counts.failed as u64;
                stats.conflicts += counts.conflicts as u64;
            }
            Ok(PassReport::Skipped { .. }) => stats.steps_skipped += 1,
            Err(err) => {
                tracing::error!(%step, error = %err, "sync step aborted");
                stats.last_error = Some(err.to_string());
            }
        }
        result
    }

    fn pull_reports_and_history(&self) -> SyncResult<PassReport> {
        let reports = self.engine.pull_reports()?;
        Ok(reports.combine(self.engine.pull_status_history()?))
    }

    /// Reports edited locally without a status change are only picked up
    /// by the second pass.
    fn push_history_and_reports(&self) -> SyncResult<PassReport> {
        let history = self.engine.push_status_history()?;
        Ok(history.combine(self.engine.push_reports()?))
    }

    /// Probes the mirror and counts dirty records, without syncing.
    ///
    /// # Errors
    ///
    /// Fails if the record store fails.
    pub fn get_sync_status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            remote_available: self.engine.is_remote_available(),
            pending: self.engine.stores().pending_counts()?,
        })
    }
}

impl<M: RemoteMirror> fmt::Debug for SyncCoordinator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("engine", &self.engine)
            .field("stats", &*self.stats.read())
            .finish()
    }
}
