//! CLI command implementations.

pub mod pass;
pub mod status;
pub mod sync;

use crate::error::{CliError, CliResult};
use crate::http::ReqwestClient;
use lalantsika_mirror::{DirMirror, RemoteMirror, RestMirror, TimeoutMirror};
use lalantsika_store::DirLock;
use lalantsika_sync::{PassCounts, PassReport, Stores, SyncConfig, SyncCoordinator, SyncEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the store and the mirror live.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// Record store directory.
    pub data: Option<PathBuf>,
    /// Directory mirror root.
    pub mirror_dir: Option<PathBuf>,
    /// Realtime Database URL.
    pub mirror_url: Option<String>,
    /// Realtime Database auth token.
    pub auth_token: Option<String>,
    /// JSON config file.
    pub config: Option<PathBuf>,
}

/// A coordinator over the target, holding the data directory lock.
pub struct Session {
    /// The coordinator.
    pub coordinator: SyncCoordinator<TimeoutMirror<dyn RemoteMirror>>,
    _lock: DirLock,
}

impl Target {
    /// Locks the data directory and wires stores, mirror and coordinator.
    pub fn open(&self) -> CliResult<Session> {
        let data = self.data.as_deref().ok_or(CliError::Missing("--data"))?;
        let config = load_config(self.config.as_deref())?;
        let lock = DirLock::try_acquire(data)?;
        let stores = Stores::open_json(data)?;

        let mirror = self.mirror(&config)?;
        let mirror = TimeoutMirror::new(mirror, config.request_timeout)
            .map_err(|e| CliError::Setup(format!("cannot start mirror runtime: {e}")))?;

        tracing::debug!(data = %data.display(), "record store opened");
        Ok(Session {
            coordinator: SyncCoordinator::new(SyncEngine::new(config, stores, mirror)),
            _lock: lock,
        })
    }

    fn mirror(&self, config: &SyncConfig) -> CliResult<Arc<dyn RemoteMirror>> {
        let probe = config.collections.probe.clone();
        if let Some(url) = &self.mirror_url {
            let client = ReqwestClient::new()
                .map_err(|e| CliError::Setup(format!("cannot build HTTP client: {e}")))?;
            let mut mirror = RestMirror::new(url.clone(), client)
                .with_probe_path(probe)
                .with_timeout(config.request_timeout);
            if let Some(token) = &self.auth_token {
                mirror = mirror.with_auth_token(token.clone());
            }
            tracing::debug!(%url, "using REST mirror");
            return Ok(Arc::new(mirror));
        }
        let dir = self
            .mirror_dir
            .as_ref()
            .ok_or(CliError::Missing("--mirror or --mirror-url"))?;
        tracing::debug!(root = %dir.display(), "using directory mirror");
        Ok(Arc::new(DirMirror::new(dir.clone()).with_probe_path(probe)))
    }
}

/// Loads a JSON config file, or the defaults.
pub fn load_config(path: Option<&Path>) -> CliResult<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let config_error = |message: String| CliError::Config {
        path: path.to_path_buf(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))
}

/// One-line summary of a pass.
pub fn describe(report: &PassReport) -> String {
    match report {
        PassReport::Skipped { reason } => format!("skipped ({reason:?})"),
        PassReport::Completed(counts) => describe_counts(counts),
    }
}

fn describe_counts(counts: &PassCounts) -> String {
    let mut line = format!(
        "{} total, {} synced, {} failed",
        counts.total, counts.synced, counts.failed
    );
    for (n, label) in [
        (counts.unresolved, "unresolved"),
        (counts.conflicts, "conflicts"),
        (counts.vanished, "vanished"),
    ] {
        if n > 0 {
            line.push_str(&format!(", {n} {label}"));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use lalantsika_sync::{ConflictPolicy, SkipReason};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_config_path_gives_defaults() {
        assert_eq!(load_config(None).unwrap(), SyncConfig::default());
    }

    #[test]
    fn config_file_is_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(
            &path,
            r#"{"request_timeout_ms": 2500, "conflict_policy": "remote_wins"}"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.conflict_policy, ConflictPolicy::RemoteWins);
        assert_eq!(config.collections.reports, "signalements");
    }

    #[test]
    fn bad_config_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("sync.json"));
    }

    #[test]
    fn open_requires_data_dir() {
        let err = Target::default().open().err().unwrap();
        assert!(matches!(err, CliError::Missing("--data")));
    }

    #[test]
    fn second_session_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let target = Target {
            data: Some(dir.path().join("data")),
            mirror_dir: Some(dir.path().join("mirror")),
            ..Target::default()
        };
        let _first = target.open().unwrap();
        assert!(matches!(target.open().err().unwrap(), CliError::Store(_)));
    }

    #[test]
    fn describes_passes() {
        let skipped = PassReport::Skipped {
            reason: SkipReason::RemoteUnavailable,
        };
        assert_eq!(describe(&skipped), "skipped (RemoteUnavailable)");

        let completed = PassReport::Completed(PassCounts {
            total: 3,
            synced: 2,
            failed: 1,
            conflicts: 1,
            ..PassCounts::default()
        });
        assert_eq!(
            describe(&completed),
            "3 total, 2 synced, 1 failed, 1 conflicts"
        );
    }
}
