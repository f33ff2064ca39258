//! Configuration for the sync engine.

use lalantsika_model::EntityKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mirror collection names per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collections {
    /// Users collection.
    pub users: String,
    /// Companies collection.
    pub companies: String,
    /// Road reports collection.
    pub reports: String,
    /// Status history collection.
    pub history: String,
    /// Parameters collection.
    pub parameters: String,
    /// Sentinel path touched by the availability probe.
    pub probe: String,
}

impl Collections {
    /// Returns the collection mirroring `kind`.
    pub fn for_kind(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Company => &self.companies,
            EntityKind::Report => &self.reports,
            EntityKind::StatusHistory => &self.history,
            EntityKind::Parameter => &self.parameters,
        }
    }
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            users: "users".into(),
            companies: "companies".into(),
            reports: "signalements".into(),
            history: "histo_statuts".into(),
            parameters: "parametres".into(),
            probe: "_health".into(),
        }
    }
}

/// Who wins when a remote edit meets a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// A dirty local record keeps its fields; the next push overwrites the
    /// remote edit. A clean local record takes the remote fields.
    #[default]
    LocalWins,
    /// The remote fields are always applied.
    RemoteWins,
}

impl ConflictPolicy {
    /// Returns true if a remote edit should be discarded.
    pub fn keeps_local(&self, local_dirty: bool) -> bool {
        match self {
            ConflictPolicy::LocalWins => local_dirty,
            ConflictPolicy::RemoteWins => false,
        }
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mirror collection names.
    pub collections: Collections,
    /// Deadline for each remote call.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Per-record retry policy.
    pub retry: RetryConfig,
    /// Remote edit resolution.
    pub conflict_policy: ConflictPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default collections and policies.
    pub fn new() -> Self {
        Self {
            collections: Collections::default(),
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Sets the collection names.
    pub fn with_collections(mut self, collections: Collections) -> Self {
        self.collections = collections;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for per-record retry of transient remote failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per record, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_request_timeout(Duration::from_secs(3))
            .with_retry(RetryConfig::no_retry())
            .with_conflict_policy(ConflictPolicy::RemoteWins);

        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.conflict_policy, ConflictPolicy::RemoteWins);
        assert_eq!(config.collections.for_kind(EntityKind::Report), "signalements");
    }

    #[test]
    fn config_from_partial_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "collections": { "reports": "reports_v2" },
                "request_timeout_ms": 2500,
                "retry": { "max_attempts": 5 },
                "conflict_policy": "remote_wins"
            }"#,
        )
        .unwrap();

        assert_eq!(config.collections.reports, "reports_v2");
        assert_eq!(config.collections.users, "users");
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.conflict_policy, ConflictPolicy::RemoteWins);
    }

    #[test]
    fn local_wins_only_over_dirty_records() {
        assert!(ConflictPolicy::LocalWins.keeps_local(true));
        assert!(!ConflictPolicy::LocalWins.keeps_local(false));
        assert!(!ConflictPolicy::RemoteWins.keeps_local(true));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn no_retry_never_waits() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }
}
