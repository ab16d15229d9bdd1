//! Host-facing entry point.
//!
//! [`GeoIpTools`] wires settings, one shared [`LookupManager`] and the
//! [`RefreshScheduler`] together, and exposes the load, command, lookup and
//! shutdown hooks a host application calls.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::fetch::DatabaseFetcher;
use crate::kind::Capability;
use crate::lookup::DatabaseOpener;
use crate::manager::LookupManager;
use crate::scheduler::{
    CycleOutcome, LogSink, ProgressSink, RefreshScheduler, TriggerOutcome,
};
use crate::settings::SharedSettings;

/// Command label that triggers a refresh.
pub const COMMAND_LABEL: &str = "geoupdate";

/// Permission required to run [`COMMAND_LABEL`].
pub const UPDATE_PERMISSION: &str = "GeoIPTools.geoupdate";

/// Prefix for every message sent to a principal.
pub const MESSAGE_PREFIX: &str = "[GeoIPTools] ";

/// Someone who can issue commands and receive messages.
pub trait Principal: Send + Sync {
    fn name(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;

    fn send_message(&self, text: &str);
}

/// Forwards cycle progress to a principal.
struct PrincipalSink(Arc<dyn Principal>);

impl ProgressSink for PrincipalSink {
    fn message(&self, text: &str) {
        self.0.send_message(&format!("{}{}", MESSAGE_PREFIX, text));
    }
}

/// GeoIP lookups with automatic database refresh.
pub struct GeoIpTools {
    settings: SharedSettings,
    manager: Arc<LookupManager>,
    scheduler: RefreshScheduler,
}

impl GeoIpTools {
    pub fn new(settings: SharedSettings, opener: Arc<dyn DatabaseOpener>) -> Self {
        Self::with_fetcher(settings, opener, DatabaseFetcher::new())
    }

    /// Use a custom fetcher, e.g. one with different timeouts.
    pub fn with_fetcher(
        settings: SharedSettings,
        opener: Arc<dyn DatabaseOpener>,
        fetcher: DatabaseFetcher,
    ) -> Self {
        let manager = Arc::new(LookupManager::new(settings.clone(), opener));
        let scheduler = RefreshScheduler::new(fetcher, manager.clone(), settings.clone());
        Self {
            settings,
            manager,
            scheduler,
        }
    }

    /// Run one synchronous refresh unless the updater is disabled.
    ///
    /// Failures are logged; the host keeps loading either way.
    pub fn on_load(&self) -> Option<CycleOutcome> {
        if self.settings.read().is_updater_disabled() {
            log::info!("Database updater disabled, using existing files");
            return None;
        }

        log::info!("Starting database updates");
        let outcome = self.scheduler.run_now(&LogSink);
        if let Some(CycleOutcome::Completed(report)) = &outcome {
            if report.is_degraded() {
                log::warn!("Some databases could not be updated, using existing files");
            }
        }
        outcome
    }

    /// Get the shared manager, opening whatever `capability` needs.
    pub fn lookup(&self, capability: Capability) -> Result<Arc<LookupManager>> {
        if let Err(e) = self.manager.ensure(capability) {
            log::warn!("Can't load database for {}: {}", capability, e);
            return Err(e);
        }
        Ok(self.manager.clone())
    }

    /// Handle a command. Returns false for labels this crate does not own.
    pub fn on_command(&self, sender: Arc<dyn Principal>, label: &str, args: &[&str]) -> bool {
        if !label.eq_ignore_ascii_case(COMMAND_LABEL) {
            return false;
        }
        if !args.is_empty() {
            log::debug!("Ignoring arguments to {}: {:?}", COMMAND_LABEL, args);
        }

        if !sender.has_permission(UPDATE_PERMISSION) {
            log::info!("{} is not allowed to run {}", sender.name(), COMMAND_LABEL);
            sender.send_message(&format!(
                "{}You don't have permission to update the databases",
                MESSAGE_PREFIX
            ));
            return true;
        }

        match self.scheduler.trigger(Arc::new(PrincipalSink(sender.clone()))) {
            Ok(TriggerOutcome::Started) => {
                log::info!("{} started a database update", sender.name());
            }
            Ok(TriggerOutcome::AlreadyRunning) => {
                sender.send_message(&format!("{}An update is already running", MESSAGE_PREFIX));
            }
            Err(e) => {
                log::error!("Failed to start database update: {}", e);
                sender.send_message(&format!("{}Error: {}", MESSAGE_PREFIX, e));
            }
        }
        true
    }

    /// Start the refresh timer.
    pub fn start_periodic(&self, check_every: Duration) -> Result<()> {
        self.scheduler.start_periodic(check_every)
    }

    /// Stop the timer and close every open database.
    pub fn shutdown(&self) {
        self.scheduler.stop_periodic();
        self.manager.close();
        log::info!("GeoIP tools shut down");
    }

    pub fn manager(&self) -> Arc<LookupManager> {
        self.manager.clone()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }
}
