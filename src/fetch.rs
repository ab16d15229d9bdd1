//! Conditional downloads of gzip-compressed database files.
//!
//! [`fetch_database`] is the whole pipeline for one file:
//! - GET with `If-Modified-Since`
//! - gzip decode streamed into a temp file next to the destination
//! - atomic rename over the destination
//!
//! [`DatabaseFetcher::update_all`] runs it for every auto-managed kind and
//! records the update time in the settings.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::kind::DatabaseKind;
use crate::settings::SharedSettings;

/// Connect timeout for database downloads.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for database downloads.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of fetching one database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was replaced; `bytes` is the decompressed size
    Updated { bytes: u64 },
    /// The server reported no change since the given time
    NotModified,
    /// The file was left untouched
    Failed(String),
}

/// Why a kind was not fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path points away from the default; the file is user managed
    PathOverridden,
    /// Updates are disabled and the file already exists
    UpdaterDisabled,
}

/// What happened to one kind during an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindStatus {
    Skipped(SkipReason),
    Fetched(FetchOutcome),
}

/// Per-kind entry of an [`UpdateReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: DatabaseKind,
    pub path: PathBuf,
    pub status: KindStatus,
}

/// Summary of one [`DatabaseFetcher::update_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub kinds: Vec<KindReport>,
    /// Set when the new update time could not be written to the settings file
    pub persist_error: Option<String>,
}

impl UpdateReport {
    /// Kinds whose file was replaced.
    pub fn updated(&self) -> impl Iterator<Item = &KindReport> {
        self.kinds.iter().filter(|k| {
            matches!(k.status, KindStatus::Fetched(FetchOutcome::Updated { .. }))
        })
    }

    /// Kinds whose fetch failed, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (&KindReport, &str)> {
        self.kinds.iter().filter_map(|k| match &k.status {
            KindStatus::Fetched(FetchOutcome::Failed(reason)) => Some((k, reason.as_str())),
            _ => None,
        })
    }

    /// Whether at least one kind failed or the settings were not saved.
    pub fn is_degraded(&self) -> bool {
        self.failures().next().is_some() || self.persist_error.is_some()
    }

    /// Status of one kind.
    pub fn status(&self, kind: DatabaseKind) -> Option<&KindStatus> {
        self.kinds.iter().find(|k| k.kind == kind).map(|k| &k.status)
    }
}

enum Plan {
    Skip(SkipReason),
    Fetch(String),
}

/// Downloads database files for the kinds the settings mark as auto-managed.
#[derive(Debug, Clone)]
pub struct DatabaseFetcher {
    agent: ureq::Agent,
}

impl Default for DatabaseFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseFetcher {
    /// Create a fetcher with the standard timeouts.
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .user_agent(concat!("geoip-tools/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    /// Create a fetcher around a preconfigured agent.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    /// Fetch one file. See [`fetch_database`].
    pub fn fetch(&self, url: &str, destination: &Path, not_before: SystemTime) -> FetchOutcome {
        fetch_database(&self.agent, url, destination, not_before)
    }

    /// Bring every auto-managed database file up to date.
    ///
    /// Kinds with an overridden path are skipped. Kinds whose file exists
    /// are skipped while the updater is disabled. All remaining URLs are
    /// validated before anything is downloaded; a bad URL aborts the run.
    /// Per-kind download failures are logged and reported, never returned.
    ///
    /// The update time is recorded and the settings are saved once per run,
    /// whatever the individual outcomes. A failed save is reported in
    /// [`UpdateReport::persist_error`], not returned.
    pub fn update_all(&self, settings: &SharedSettings) -> Result<UpdateReport> {
        let (plan, not_before) = {
            let settings = settings.read();
            let disabled = settings.is_updater_disabled();
            let plan: Vec<(DatabaseKind, PathBuf, Plan)> = DatabaseKind::ALL
                .iter()
                .map(|&kind| {
                    let path = settings.database_path(kind);
                    let action = if settings.is_path_overridden(kind) {
                        Plan::Skip(SkipReason::PathOverridden)
                    } else if disabled && path.exists() {
                        Plan::Skip(SkipReason::UpdaterDisabled)
                    } else {
                        Plan::Fetch(settings.database_url(kind))
                    };
                    (kind, path, action)
                })
                .collect();
            (plan, settings.last_updated())
        };

        for (kind, _, action) in &plan {
            if let Plan::Fetch(url) = action {
                validate_url(*kind, url)?;
            }
        }

        let mut report = UpdateReport::default();
        for (kind, path, action) in plan {
            let status = match action {
                Plan::Skip(reason) => {
                    log::debug!("Skipping {} database update: {:?}", kind, reason);
                    KindStatus::Skipped(reason)
                }
                Plan::Fetch(url) => {
                    let outcome = self.fetch(&url, &path, not_before);
                    match &outcome {
                        FetchOutcome::Updated { bytes } => {
                            log::info!("{} updated ({} bytes)", path.display(), bytes)
                        }
                        FetchOutcome::NotModified => {
                            log::info!("{} is up to date", path.display())
                        }
                        FetchOutcome::Failed(reason) => {
                            log::warn!("{} database update failed: {}", kind, reason)
                        }
                    }
                    KindStatus::Fetched(outcome)
                }
            };
            report.kinds.push(KindReport { kind, path, status });
        }

        let mut settings = settings.write();
        settings.set_last_updated(SystemTime::now());
        if let Err(e) = settings.save() {
            log::warn!("Failed to save settings after update: {}", e);
            report.persist_error = Some(e.to_string());
        }

        Ok(report)
    }
}

/// Check that a configured URL is an absolute http(s) URL.
pub fn validate_url(kind: DatabaseKind, url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl {
        kind,
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidUrl {
            kind,
            url: url.to_string(),
            reason: format!("unsupported scheme {:?}", other),
        }),
    }
}

/// Format a time as an HTTP date (RFC 7231 IMF-fixdate).
///
/// `None` for times before the epoch or past the representable range.
pub fn http_date(time: SystemTime) -> Option<String> {
    let millis = time.duration_since(UNIX_EPOCH).ok()?.as_millis();
    let date = DateTime::<Utc>::from_timestamp_millis(i64::try_from(millis).ok()?)?;
    Some(date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Download `url` into `destination` if it changed after `not_before`.
///
/// The body must be gzip-compressed unless the server applied gzip as a
/// transfer encoding. The destination is only ever replaced by a complete
/// file; on any failure it is left as it was.
pub fn fetch_database(
    agent: &ureq::Agent,
    url: &str,
    destination: &Path,
    not_before: SystemTime,
) -> FetchOutcome {
    let mut request = agent.get(url);
    if not_before > UNIX_EPOCH {
        match http_date(not_before) {
            Some(date) => request = request.set("If-Modified-Since", &date),
            None => log::warn!("Last update time out of range, fetching {} unconditionally", url),
        }
    }

    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::Status(304, _)) => return FetchOutcome::NotModified,
        Err(ureq::Error::Status(code, _)) => return FetchOutcome::Failed(format!("HTTP {}", code)),
        Err(ureq::Error::Transport(t)) => return FetchOutcome::Failed(t.to_string()),
    };

    match response.status() {
        200 => {}
        304 => return FetchOutcome::NotModified,
        code => return FetchOutcome::Failed(format!("HTTP {}", code)),
    }

    // ureq already decoded a gzip transfer encoding
    let decoded = response
        .header("Content-Encoding")
        .is_some_and(|enc| enc.eq_ignore_ascii_case("gzip"));

    let body = response.into_reader();
    let result = if decoded {
        write_atomically(body, destination)
    } else {
        write_atomically(GzDecoder::new(body), destination)
    };

    match result {
        Ok(bytes) => FetchOutcome::Updated { bytes },
        Err(e) => FetchOutcome::Failed(e.to_string()),
    }
}

/// Stream `reader` into a temp file beside `destination`, then rename it
/// over the destination. The temp file is removed on failure.
fn write_atomically(mut reader: impl Read, destination: &Path) -> io::Result<u64> {
    let dir = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    let bytes = io::copy(&mut reader, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| e.error)?;
    Ok(bytes)
}
