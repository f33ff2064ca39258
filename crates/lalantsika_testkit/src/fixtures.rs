//! Test fixtures.
//!
//! Provides in-memory and on-disk wiring of the record stores, the mirror
//! and the coordinator.

use lalantsika_mirror::{DirMirror, MemoryMirror};
use lalantsika_model::{Company, Parameter, Report, StatusHistoryEntry, User};
use lalantsika_store::{MemoryStore, RecordStore};
use lalantsika_sync::{RetryConfig, Stores, SyncConfig, SyncCoordinator, SyncEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// In-memory stores and mirror behind a coordinator.
///
/// The typed store handles stay reachable for fault injection
/// (`set_unavailable`) and direct inspection.
pub struct TestHarness {
    /// Users.
    pub users: Arc<MemoryStore<User>>,
    /// Companies.
    pub companies: Arc<MemoryStore<Company>>,
    /// Reports.
    pub reports: Arc<MemoryStore<Report>>,
    /// Status history.
    pub history: Arc<MemoryStore<StatusHistoryEntry>>,
    /// Parameters.
    pub parameters: Arc<MemoryStore<Parameter>>,
    /// The mirror, shared with the engine.
    pub mirror: Arc<MemoryMirror>,
    /// The coordinator under test.
    pub coordinator: SyncCoordinator<Arc<MemoryMirror>>,
}

impl TestHarness {
    /// Creates a harness that never retries, so failures surface at once.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a harness with a custom configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        let users = Arc::new(MemoryStore::<User>::new());
        let companies = Arc::new(MemoryStore::<Company>::new());
        let reports = Arc::new(MemoryStore::<Report>::new());
        let history = Arc::new(MemoryStore::<StatusHistoryEntry>::new());
        let parameters = Arc::new(MemoryStore::<Parameter>::new());
        let mirror = Arc::new(MemoryMirror::new());

        let stores = Stores {
            users: Arc::clone(&users) as Arc<dyn RecordStore<User>>,
            companies: Arc::clone(&companies) as Arc<dyn RecordStore<Company>>,
            reports: Arc::clone(&reports) as Arc<dyn RecordStore<Report>>,
            history: Arc::clone(&history) as Arc<dyn RecordStore<StatusHistoryEntry>>,
            parameters: Arc::clone(&parameters) as Arc<dyn RecordStore<Parameter>>,
        };
        let engine = SyncEngine::new(config, stores, Arc::clone(&mirror));

        Self {
            users,
            companies,
            reports,
            history,
            parameters,
            mirror,
            coordinator: SyncCoordinator::new(engine),
        }
    }

    /// Gets the engine.
    pub fn engine(&self) -> &SyncEngine<Arc<MemoryMirror>> {
        self.coordinator.engine()
    }

    /// Gets the engine's stores.
    pub fn stores(&self) -> &Stores {
        self.engine().stores()
    }

    /// Name of the mirror collection for users.
    pub fn users_collection(&self) -> String {
        self.engine().config().collections.users.clone()
    }

    /// Name of the mirror collection for reports.
    pub fn reports_collection(&self) -> String {
        self.engine().config().collections.reports.clone()
    }

    /// Name of the mirror collection for status history.
    pub fn history_collection(&self) -> String {
        self.engine().config().collections.history.clone()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Default configuration with retries disabled.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_retry(RetryConfig::no_retry())
}

/// A temporary directory holding a store data dir and a mirror root.
pub struct DiskFixture {
    data_dir: PathBuf,
    mirror_dir: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl DiskFixture {
    /// Creates the directory layout.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data_dir = temp_dir.path().join("data");
        let mirror_dir = temp_dir.path().join("mirror");
        std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
        std::fs::create_dir_all(&mirror_dir).expect("Failed to create mirror directory");
        Self {
            data_dir,
            mirror_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Store data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Mirror root directory.
    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    /// Opens JSON file stores over the data directory.
    pub fn open_stores(&self) -> Stores {
        Stores::open_json(&self.data_dir).expect("Failed to open file stores")
    }

    /// A directory mirror over the mirror root.
    pub fn mirror(&self) -> DirMirror {
        DirMirror::new(self.mirror_dir.clone())
    }

    /// Builds a coordinator over freshly opened stores and the mirror.
    pub fn coordinator(&self) -> SyncCoordinator<DirMirror> {
        SyncCoordinator::new(SyncEngine::new(
            test_config(),
            self.open_stores(),
            self.mirror(),
        ))
    }
}

impl Default for DiskFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a fresh [`TestHarness`].
///
/// # Example
///
/// ```rust,ignore
/// use lalantsika_testkit::with_harness;
///
/// #[test]
/// fn my_test() {
///     with_harness(|h| {
///         assert!(h.engine().is_remote_available());
///     });
/// }
/// ```
pub fn with_harness<F, R>(f: F) -> R
where
    F: FnOnce(&TestHarness) -> R,
{
    let harness = TestHarness::new();
    f(&harness)
}
