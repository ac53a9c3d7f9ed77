//! Online-status monitoring.
//!
//! The monitor mirrors the platform's connectivity events (the passive
//! signal) and can run a heartbeat that probes a well-known endpoint
//! (the active signal). The probe is advisory: engine calls still handle
//! their own failures whatever the monitor says.
//!
//! The monitor also tracks foreground activity. Becoming visible or
//! regaining focus after at least [`WAKE_THRESHOLD`] of inactivity
//! publishes a wake event, and the heartbeat pauses while hidden.

use crate::config::ProbeConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Minimum inactivity before becoming visible or focused counts as a wake.
pub const WAKE_THRESHOLD: Duration = Duration::from_secs(60);

/// A best-effort reachability check.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if the network looks usable.
    async fn probe(&self) -> bool;
}

/// Probes reachability by opening a TCP connection.
///
/// Any accepted connection counts as reachable; nothing is sent.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe connecting to `target` (`host:port`).
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    /// Creates a probe from its configuration.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.target.clone(), config.timeout)
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.target, error = %e, "probe connection failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.target, "probe timed out");
                false
            }
        }
    }
}

#[derive(Debug)]
struct Activity {
    visible: bool,
    last_active: Instant,
}

/// Current connectivity, published on a watch channel.
#[derive(Debug)]
pub struct OnlineMonitor {
    tx: watch::Sender<bool>,
    wakes: watch::Sender<u64>,
    activity: Mutex<Activity>,
    wake_threshold: Duration,
}

impl OnlineMonitor {
    /// Creates a visible monitor with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        let (wakes, _) = watch::channel(0);
        Self {
            tx,
            wakes,
            activity: Mutex::new(Activity {
                visible: true,
                last_active: Instant::now(),
            }),
            wake_threshold: WAKE_THRESHOLD,
        }
    }

    /// Sets the inactivity needed for a wake event.
    pub fn with_wake_threshold(mut self, threshold: Duration) -> Self {
        self.wake_threshold = threshold;
        self
    }

    /// Records a visibility change reported by the platform.
    ///
    /// Both directions reset the activity clock. Becoming visible after
    /// the wake threshold publishes a wake event.
    pub fn set_visible(&self, visible: bool) {
        let idle = {
            let mut activity = self.activity.lock();
            if activity.visible == visible {
                return;
            }
            let now = Instant::now();
            let idle = now.duration_since(activity.last_active);
            activity.visible = visible;
            activity.last_active = now;
            idle
        };
        if visible && idle >= self.wake_threshold {
            self.wake(idle);
        }
    }

    /// Records that the application regained focus.
    pub fn notify_focus(&self) {
        let idle = {
            let mut activity = self.activity.lock();
            let now = Instant::now();
            let idle = now.duration_since(activity.last_active);
            activity.visible = true;
            activity.last_active = now;
            idle
        };
        if idle >= self.wake_threshold {
            self.wake(idle);
        }
    }

    /// Returns true if the application is in the foreground.
    pub fn is_visible(&self) -> bool {
        self.activity.lock().visible
    }

    /// Subscribes to wake events.
    ///
    /// The value counts wakes since the monitor was created.
    pub fn subscribe_wake(&self) -> watch::Receiver<u64> {
        self.wakes.subscribe()
    }

    fn wake(&self, idle: Duration) {
        tracing::info!(idle_secs = idle.as_secs(), "woke after inactivity");
        self.wakes.send_modify(|count| *count += 1);
    }

    /// Records a connectivity change reported by the platform.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Starts a heartbeat that updates the state from `probe`.
    ///
    /// A successful probe marks the monitor online. `failure_threshold`
    /// consecutive failures mark it offline. Ticks are skipped while the
    /// application is hidden. The task stops once the monitor is dropped.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        config: &ProbeConfig,
    ) -> JoinHandle<()> {
        let monitor: Weak<Self> = Arc::downgrade(self);
        let period = config.heartbeat_interval;
        let threshold = config.failure_threshold.max(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                ticker.tick().await;
                match monitor.upgrade() {
                    None => break,
                    Some(current) if !current.is_visible() => continue,
                    Some(_) => {}
                }
                let reachable = probe.probe().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };

                if reachable {
                    failures = 0;
                    monitor.set_online(true);
                } else {
                    failures += 1;
                    tracing::debug!(failures, "heartbeat probe failed");
                    if failures >= threshold {
                        monitor.set_online(false);
                    }
                }
            }
        })
    }
}

impl Default for OnlineMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
