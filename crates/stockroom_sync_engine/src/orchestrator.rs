//! Sync orchestration.
//!
//! The orchestrator decides when a sync cycle runs and guarantees that at
//! most one runs at a time. Triggers (interval, reconnect, new outbox
//! item, startup, wake) are funneled through a bounded channel of capacity one
//! drained by a single consumer task: a trigger arriving mid-cycle takes
//! the free slot and yields exactly one follow-up cycle, and any further
//! triggers are dropped.
//!
//! A wake after inactivity only requests a cycle when items are queued or
//! the last sync is older than `wake_resync_after`.
//!
//! ```text
//!            trigger, online            push failures = 0
//!   Idle ----------------------> Syncing -----------------> Idle
//!    ^                             |   \
//!    |                             |    \ push failures > 0
//!    |       trigger, online       |     `--------------> Error
//!   Offline <--------------------- | ----- connectivity lost (any state)
//!      `-----> Idle  connectivity back
//! ```

use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::monitor::OnlineMonitor;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use stockroom_storage::LocalStore;
use stockroom_sync_protocol::{Identity, PullQuery};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Metadata slot holding the pull cursor (RFC 3339).
pub const LAST_SYNC_KEY: &str = "sync.last_sync_time";

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for a trigger.
    Idle,
    /// A cycle is running.
    Syncing,
    /// The last cycle had push failures.
    Error,
    /// Connectivity is lost.
    Offline,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("idle"),
            SyncState::Syncing => f.write_str("syncing"),
            SyncState::Error => f.write_str("error"),
            SyncState::Offline => f.write_str("offline"),
        }
    }
}

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic timer fired.
    Interval,
    /// Connectivity came back.
    Reconnect,
    /// The outbox grew.
    PendingIncreased,
    /// The session started with an identity.
    Startup,
    /// The application asked for a sync.
    Manual,
    /// The application returned to the foreground after inactivity.
    Wake,
}

/// Counts from the last completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSyncResult {
    /// Items pushed.
    pub pushed: usize,
    /// Rows pulled.
    pub pulled: usize,
}

/// A snapshot of the orchestrator's read-only state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// Current state.
    pub state: SyncState,
    /// Items waiting in the outbox.
    pub pending_count: usize,
    /// Persisted pull cursor.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Counts from the last completed cycle.
    pub last_result: Option<LastSyncResult>,
}

/// Schedules and single-flights sync cycles.
pub struct SyncOrchestrator<R: RemoteStore> {
    engine: Arc<SyncEngine<R>>,
    monitor: Arc<OnlineMonitor>,
    identity: watch::Sender<Option<Identity>>,
    state: watch::Sender<SyncState>,
    pending: watch::Receiver<usize>,
    last_result: Mutex<Option<LastSyncResult>>,
    last_trigger: Mutex<Option<Trigger>>,
    cycle: tokio::sync::Mutex<()>,
    triggers: mpsc::Sender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Trigger>>>,
}

impl<R: RemoteStore + 'static> SyncOrchestrator<R> {
    /// Creates an orchestrator around `engine`.
    pub fn new(engine: Arc<SyncEngine<R>>, monitor: Arc<OnlineMonitor>) -> Arc<Self> {
        let initial = if monitor.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (triggers, trigger_rx) = mpsc::channel(1);
        let pending = engine.outbox().subscribe();

        Arc::new(Self {
            engine,
            monitor,
            identity: watch::channel(None).0,
            state: watch::channel(initial).0,
            pending,
            last_result: Mutex::new(None),
            last_trigger: Mutex::new(None),
            cycle: tokio::sync::Mutex::new(()),
            triggers,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    /// Sets or clears the caller identity.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.identity.send_replace(identity);
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Returns the live number of queued items.
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Returns the counts of the last completed cycle.
    pub fn last_result(&self) -> Option<LastSyncResult> {
        *self.last_result.lock()
    }

    /// Returns the trigger most recently taken by the consumer task.
    pub fn last_trigger(&self) -> Option<Trigger> {
        *self.last_trigger.lock()
    }

    /// Returns the persisted pull cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read or parsed.
    pub fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        read_cursor(self.engine.store().as_ref())
    }

    /// Returns the number of items that used up their push attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox cannot be read.
    pub fn stranded_count(&self) -> SyncResult<usize> {
        Ok(self
            .engine
            .outbox()
            .stranded(self.engine.config().max_push_attempts)?
            .len())
    }

    /// Returns a snapshot of the read-only state.
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            state: self.state(),
            pending_count: self.pending_count(),
            last_sync_time: self.last_sync_time().ok().flatten(),
            last_result: self.last_result(),
        }
    }

    /// Forgets the pull cursor so the next cycle pulls everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be written.
    pub fn reset_cursor(&self) -> SyncResult<()> {
        self.engine.store().remove_meta(LAST_SYNC_KEY)?;
        Ok(())
    }

    /// Requests a cycle from the consumer task.
    ///
    /// Returns `false` if a request is already waiting, in which case this
    /// one is folded into it.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        match self.triggers.try_send(trigger) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!(?trigger, "trigger dropped");
                false
            }
        }
    }

    /// Runs one cycle now.
    ///
    /// Returns `None` without doing anything if a cycle is already in
    /// flight, no identity is set or the monitor reports offline.
    pub async fn sync(&self) -> Option<SyncReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            tracing::debug!("sync already in flight");
            return None;
        };

        let identity = self.identity.borrow().clone()?;
        if !self.monitor.is_online() {
            self.state.send_replace(SyncState::Offline);
            return None;
        }

        self.state.send_replace(SyncState::Syncing);
        let started = Utc::now();
        let since = match read_cursor(self.engine.store().as_ref()) {
            Ok(cursor) => cursor.unwrap_or_else(PullQuery::epoch),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable sync cursor, pulling everything");
                PullQuery::epoch()
            }
        };

        let report = self.engine.full_sync(&identity, since).await;

        if report.skipped.is_empty() {
            if let Err(e) = self
                .engine
                .store()
                .set_meta(LAST_SYNC_KEY, &started.to_rfc3339())
            {
                tracing::error!(error = %e, "failed to persist sync cursor");
            }
        } else {
            tracing::warn!(skipped = ?report.skipped, "cursor not advanced");
        }

        *self.last_result.lock() = Some(LastSyncResult {
            pushed: report.pushed,
            pulled: report.pulled,
        });

        let next = if !self.monitor.is_online() {
            SyncState::Offline
        } else if report.success {
            SyncState::Idle
        } else {
            SyncState::Error
        };
        self.state.send_replace(next);
        Some(report)
    }

    /// Starts the consumer task and every trigger source.
    ///
    /// May only be called once; later calls return an empty handle.
    pub fn spawn(self: &Arc<Self>) -> OrchestratorHandle {
        let Some(mut rx) = self.trigger_rx.lock().take() else {
            return OrchestratorHandle { tasks: Vec::new() };
        };
        let mut tasks = Vec::new();

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                tracing::debug!(?trigger, "sync triggered");
                *this.last_trigger.lock() = Some(trigger);
                this.sync().await;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.engine.config().sync_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.identity.borrow().is_some() && this.monitor.is_online() {
                    this.trigger(Trigger::Interval);
                }
            }
        }));

        let this = Arc::clone(self);
        let mut online = self.monitor.subscribe();
        tasks.push(tokio::spawn(async move {
            while online.changed().await.is_ok() {
                if *online.borrow_and_update() {
                    this.state.send_if_modified(|state| {
                        let offline = *state == SyncState::Offline;
                        if offline {
                            *state = SyncState::Idle;
                        }
                        offline
                    });
                    tokio::time::sleep(this.engine.config().reconnect_delay).await;
                    if this.monitor.is_online() {
                        this.trigger(Trigger::Reconnect);
                    }
                } else if this.state() != SyncState::Syncing {
                    this.state.send_replace(SyncState::Offline);
                }
            }
        }));

        let this = Arc::clone(self);
        let mut pending = self.engine.outbox().subscribe();
        tasks.push(tokio::spawn(async move {
            let mut last = *pending.borrow_and_update();
            while pending.changed().await.is_ok() {
                let count = *pending.borrow_and_update();
                if count > last {
                    this.trigger(Trigger::PendingIncreased);
                }
                last = count;
            }
        }));

        let this = Arc::clone(self);
        let mut wakes = self.monitor.subscribe_wake();
        tasks.push(tokio::spawn(async move {
            while wakes.changed().await.is_ok() {
                if this.wants_wake_sync() {
                    this.trigger(Trigger::Wake);
                }
            }
        }));

        let this = Arc::clone(self);
        let mut identity = self.identity.subscribe();
        tasks.push(tokio::spawn(async move {
            if identity.wait_for(Option::is_some).await.is_ok() {
                this.trigger(Trigger::Startup);
            }
        }));

        OrchestratorHandle { tasks }
    }

    /// Returns true if a wake should request a cycle.
    ///
    /// A wake with nothing queued is ignored while the last sync is
    /// younger than `wake_resync_after`.
    fn wants_wake_sync(&self) -> bool {
        if self.identity.borrow().is_none()
            || !self.monitor.is_online()
            || self.state() == SyncState::Syncing
        {
            return false;
        }
        if self.pending_count() > 0 {
            return true;
        }
        let threshold = self.engine.config().wake_resync_after;
        match self.last_sync_time() {
            Ok(Some(at)) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map_or(false, |age| age >= threshold)
            }
            Ok(None) | Err(_) => true,
        }
    }
}

fn read_cursor(store: &dyn LocalStore) -> SyncResult<Option<DateTime<Utc>>> {
    let Some(raw) = store.get_meta(LAST_SYNC_KEY)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|_| SyncError::InvalidCursor(raw))
}

/// Background tasks of a running orchestrator.
///
/// Dropping the handle stops them.
pub struct OrchestratorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Stops every task.
    pub fn shutdown(self) {}
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
