//! Refresh cycles: download fresh databases, then reload the manager.
//!
//! A cycle moves `Idle → Fetching → Reloading → Idle`. A fatal error in
//! either stage passes through `Failed` and still ends in `Idle`, so the
//! next cycle can run. Only one cycle runs at a time; triggers that arrive
//! while a cycle is in progress are dropped, not queued.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fetch::{DatabaseFetcher, UpdateReport};
use crate::manager::LookupManager;
use crate::settings::SharedSettings;

/// How often the periodic timer checks whether an update is due.
pub const DEFAULT_CHECK_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Receives human-readable progress messages for one cycle.
pub trait ProgressSink: Send + Sync {
    fn message(&self, text: &str);
}

/// Sink for passive triggers: writes progress to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn message(&self, text: &str) {
        log::info!("{}", text);
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Fetching,
    Reloading,
    Failed,
}

/// Stage a cycle failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Fetching,
    Reloading,
}

/// Result of a finished cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Files were fetched (possibly with per-kind failures) and reloaded
    Completed(UpdateReport),
    Failed { stage: CycleStage, message: String },
}

/// Whether a trigger started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

struct Shared {
    fetcher: DatabaseFetcher,
    manager: Arc<LookupManager>,
    settings: SharedSettings,
    state: Mutex<RefreshState>,
    last_outcome: Mutex<Option<CycleOutcome>>,
}

/// Returns the scheduler to `Idle` when a cycle ends, even by panic.
struct CycleGuard<'a>(&'a Shared);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.0.state.lock() = RefreshState::Idle;
    }
}

impl Shared {
    /// Move from `Idle` to `Fetching`. False if a cycle is running.
    fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state != RefreshState::Idle {
            return false;
        }
        *state = RefreshState::Fetching;
        true
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.lock() = state;
    }

    /// Run a cycle that `begin` already claimed.
    fn run(&self, sink: &dyn ProgressSink) -> CycleOutcome {
        let _guard = CycleGuard(self);

        sink.message("Starting update");
        let outcome = match self.fetcher.update_all(&self.settings) {
            Ok(report) => {
                for kind in report.updated() {
                    sink.message(&format!("{} updated", kind.path.display()));
                }
                for (kind, reason) in report.failures() {
                    sink.message(&format!("{} update failed: {}", kind.kind, reason));
                }
                if let Some(e) = &report.persist_error {
                    sink.message(&format!("Settings not saved: {}", e));
                }
                sink.message("Update finished");

                self.set_state(RefreshState::Reloading);
                match self.manager.reload() {
                    Ok(()) => {
                        sink.message("Database reloaded");
                        CycleOutcome::Completed(report)
                    }
                    Err(e) => self.fail(CycleStage::Reloading, e, sink),
                }
            }
            Err(e) => self.fail(CycleStage::Fetching, e, sink),
        };

        *self.last_outcome.lock() = Some(outcome.clone());
        outcome
    }

    fn fail(&self, stage: CycleStage, error: Error, sink: &dyn ProgressSink) -> CycleOutcome {
        self.set_state(RefreshState::Failed);
        log::error!("Database refresh failed while {:?}: {}", stage, error);
        sink.message(&format!("Error: {}", error));
        CycleOutcome::Failed {
            stage,
            message: error.to_string(),
        }
    }
}

struct Periodic {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: JoinHandle<()>,
}

/// Runs refresh cycles on demand or on a timer.
pub struct RefreshScheduler {
    inner: Arc<Shared>,
    periodic: Mutex<Option<Periodic>>,
}

impl RefreshScheduler {
    pub fn new(
        fetcher: DatabaseFetcher,
        manager: Arc<LookupManager>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                fetcher,
                manager,
                settings,
                state: Mutex::new(RefreshState::Idle),
                last_outcome: Mutex::new(None),
            }),
            periodic: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> RefreshState {
        *self.inner.state.lock()
    }

    /// Outcome of the most recently finished cycle.
    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.inner.last_outcome.lock().clone()
    }

    /// Start a cycle on a background thread.
    ///
    /// Returns `AlreadyRunning` without doing anything if a cycle is in
    /// progress.
    pub fn trigger(&self, sink: Arc<dyn ProgressSink>) -> Result<TriggerOutcome> {
        if !self.inner.begin() {
            log::debug!("Refresh already in progress, ignoring trigger");
            return Ok(TriggerOutcome::AlreadyRunning);
        }

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("geoip-refresh".to_string())
            .spawn(move || {
                inner.run(sink.as_ref());
            });

        match spawned {
            Ok(_) => Ok(TriggerOutcome::Started),
            Err(e) => {
                self.inner.set_state(RefreshState::Idle);
                Err(e.into())
            }
        }
    }

    /// Run a cycle on the calling thread.
    ///
    /// Returns `None` if a cycle is already in progress.
    pub fn run_now(&self, sink: &dyn ProgressSink) -> Option<CycleOutcome> {
        if !self.inner.begin() {
            log::debug!("Refresh already in progress, skipping");
            return None;
        }
        Some(self.inner.run(sink))
    }

    /// Check every `check_every` whether the configured update interval has
    /// elapsed, and run a passive cycle when it has.
    ///
    /// The first check happens immediately. Disabled updaters are never
    /// triggered. Calling this while the timer runs does nothing.
    pub fn start_periodic(&self, check_every: Duration) -> Result<()> {
        let mut periodic = self.periodic.lock();
        if periodic.is_some() {
            return Ok(());
        }

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = stop.clone();
        let inner = self.inner.clone();

        let thread = thread::Builder::new()
            .name("geoip-refresh-timer".to_string())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                loop {
                    let due = {
                        let settings = inner.settings.read();
                        !settings.is_updater_disabled() && settings.needs_update()
                    };
                    if due && inner.begin() {
                        inner.run(&LogSink);
                    }

                    let mut stopped = lock.lock();
                    if !*stopped {
                        cvar.wait_for(&mut stopped, check_every);
                    }
                    if *stopped {
                        break;
                    }
                }
                log::debug!("Refresh timer stopped");
            })?;

        log::info!("Refresh timer started, checking every {:?}", check_every);
        *periodic = Some(Periodic { stop, thread });
        Ok(())
    }

    /// Stop the periodic timer and wait for it to exit.
    ///
    /// A cycle already running on the timer thread finishes first.
    pub fn stop_periodic(&self) {
        let periodic = self.periodic.lock().take();
        if let Some(periodic) = periodic {
            {
                let (lock, cvar) = &*periodic.stop;
                *lock.lock() = true;
                cvar.notify_all();
            }
            if periodic.thread.join().is_err() {
                log::warn!("Refresh timer thread panicked");
            }
        }
    }

    /// Whether the periodic timer is running.
    pub fn is_periodic(&self) -> bool {
        self.periodic.lock().is_some()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}
