//! Configuration for the sync engine.

use std::time::Duration;
use stockroom_sync_protocol::{EntityKind, MAX_PUSH_ATTEMPTS};

/// Configuration for sync cycles and their scheduling.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between scheduled cycles while online and signed in.
    pub sync_interval: Duration,
    /// Failed push attempts after which an item is stranded.
    pub max_push_attempts: u32,
    /// Delay between regaining connectivity and the reconnect cycle.
    pub reconnect_delay: Duration,
    /// Age of the last sync below which a wake with an empty outbox is
    /// ignored.
    pub wake_resync_after: Duration,
    /// Entity kinds pulled each cycle, in order.
    pub tracked_kinds: Vec<EntityKind>,
    /// Reachability probe configuration.
    pub probe: ProbeConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default schedule.
    pub fn new() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            max_push_attempts: MAX_PUSH_ATTEMPTS,
            reconnect_delay: Duration::from_secs(3),
            wake_resync_after: Duration::from_secs(10 * 60),
            tracked_kinds: EntityKind::ALL.to_vec(),
            probe: ProbeConfig::default(),
        }
    }

    /// Sets the scheduled sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the push attempt cap.
    pub fn with_max_push_attempts(mut self, attempts: u32) -> Self {
        self.max_push_attempts = attempts;
        self
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets how stale the last sync must be for an idle wake to sync.
    pub fn with_wake_resync_after(mut self, age: Duration) -> Self {
        self.wake_resync_after = age;
        self
    }

    /// Restricts pulls to the given kinds.
    pub fn with_tracked_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.tracked_kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the probe configuration.
    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the active reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` the probe connects to.
    pub target: String,
    /// Time allowed for one probe.
    pub timeout: Duration,
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Consecutive failures that mark the monitor offline.
    pub failure_threshold: u32,
}

impl ProbeConfig {
    /// Creates a probe configuration for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            failure_threshold: 2,
        }
    }

    /// Sets the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, failures: u32) -> Self {
        self.failure_threshold = failures.max(1);
        self
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::new("www.google.com:443")
    }
}
