//! Lookup manager: which database file backs which capability.
//!
//! The manager owns at most one primary (IPv4) handle, serving either the
//! country or the city database, plus an independent IPv6 handle. All
//! state lives behind one lock:
//!
//! - queries take the read lock and never block each other
//! - ensure, reload and close take the write lock, so a query never sees
//!   a handle between close and reopen
//!
//! Replacing a handle opens the new one first. If that fails, the old
//! handle stays installed and usable. Otherwise the old handle is closed
//! before the lock is released.

use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::Result;
use crate::kind::{Capability, DatabaseKind, PrimaryKind};
use crate::lookup::{Country, DatabaseOpener, Location, LookupHandle};
use crate::settings::SharedSettings;

#[derive(Default)]
struct Handles {
    primary: Option<(PrimaryKind, Box<dyn LookupHandle>)>,
    v6: Option<Box<dyn LookupHandle>>,
}

/// Thread-safe owner of the open lookup handles.
///
/// # Example
///
/// ```ignore
/// use geoip_tools::{LookupManager, MaxMindOpener, Settings};
/// use std::sync::Arc;
///
/// let settings = Settings::in_memory("./plugins/GeoIPTools").into_shared();
/// let manager = LookupManager::new(settings, Arc::new(MaxMindOpener));
///
/// manager.ensure_country()?;
/// let country = manager.country("8.8.8.8".parse()?);
/// ```
pub struct LookupManager {
    settings: SharedSettings,
    opener: Arc<dyn DatabaseOpener>,
    handles: RwLock<Handles>,
}

impl LookupManager {
    /// Create a manager with no open handles.
    pub fn new(settings: SharedSettings, opener: Arc<dyn DatabaseOpener>) -> Self {
        Self {
            settings,
            opener,
            handles: RwLock::new(Handles::default()),
        }
    }

    fn open(&self, kind: DatabaseKind) -> Result<Box<dyn LookupHandle>> {
        let path = self.settings.read().database_path(kind);
        self.opener.open(kind, &path)
    }

    /// Make country lookups available.
    ///
    /// No-op when a country or city database is already open.
    pub fn ensure_country(&self) -> Result<()> {
        let mut handles = self.handles.write();
        if handles.primary.is_some() {
            return Ok(());
        }
        let handle = self.open(DatabaseKind::Country)?;
        handles.primary = Some((PrimaryKind::Country, handle));
        log::info!("Country database ready");
        Ok(())
    }

    /// Make city lookups available, upgrading from country if needed.
    pub fn ensure_city(&self) -> Result<()> {
        let mut handles = self.handles.write();
        if matches!(handles.primary, Some((PrimaryKind::City, _))) {
            return Ok(());
        }
        let handle = self.open(DatabaseKind::City)?;
        if let Some((old_kind, old)) = handles.primary.replace((PrimaryKind::City, handle)) {
            old.close();
            log::info!("Replaced {} database with city database", old_kind);
        } else {
            log::info!("City database ready");
        }
        Ok(())
    }

    /// Make IPv6 country lookups available.
    pub fn ensure_ipv6(&self) -> Result<()> {
        let mut handles = self.handles.write();
        if handles.v6.is_some() {
            return Ok(());
        }
        let handle = self.open(DatabaseKind::Ipv6)?;
        handles.v6 = Some(handle);
        log::info!("IPv6 database ready");
        Ok(())
    }

    /// Ensure every database a capability needs is open.
    pub fn ensure(&self, capability: Capability) -> Result<()> {
        match capability.primary() {
            Some(PrimaryKind::Country) => self.ensure_country()?,
            Some(PrimaryKind::City) => self.ensure_city()?,
            None => {}
        }
        if capability.wants_ipv6() {
            self.ensure_ipv6()?;
        }
        Ok(())
    }

    /// Look up the country of an address.
    ///
    /// Returns [`Country::unknown`] when the needed database is not open or
    /// has no entry for the address.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are looked up as IPv4.
    pub fn country(&self, ip: IpAddr) -> Country {
        let ip = ip.to_canonical();
        let handles = self.handles.read();
        let handle = match ip {
            IpAddr::V4(_) => handles.primary.as_ref().map(|(_, h)| h),
            IpAddr::V6(_) => handles.v6.as_ref(),
        };

        match handle {
            Some(handle) => handle.country(ip).unwrap_or_else(Country::unknown),
            None => {
                let family = if ip.is_ipv4() { "IPv4" } else { "IPv6" };
                log::warn!("Uninitialised {} database, cannot look up {}", family, ip);
                Country::unknown()
            }
        }
    }

    /// Look up the country of a textual address.
    ///
    /// Text that is neither an IPv4 nor an IPv6 address yields
    /// [`Country::unknown`].
    pub fn country_of(&self, address: &str) -> Country {
        match address.trim().parse::<IpAddr>() {
            Ok(ip) => self.country(ip),
            Err(_) => {
                log::warn!("Not an IPv4 or IPv6 address: {:?}", address);
                Country::unknown()
            }
        }
    }

    /// Look up the location of an IPv4 address.
    ///
    /// Needs the city database. IPv6 addresses are not supported.
    pub fn location(&self, ip: IpAddr) -> Option<Location> {
        let ip = ip.to_canonical();
        if ip.is_ipv6() {
            log::warn!("IPv6 is not supported for location lookups ({})", ip);
            return None;
        }

        let handles = self.handles.read();
        match &handles.primary {
            Some((PrimaryKind::City, handle)) => handle.location(ip),
            Some((PrimaryKind::Country, _)) => {
                log::warn!("Location lookup for {} needs the city database", ip);
                None
            }
            None => {
                log::warn!("Uninitialised IPv4 database, cannot locate {}", ip);
                None
            }
        }
    }

    /// Look up the location of a textual address.
    pub fn location_of(&self, address: &str) -> Option<Location> {
        match address.trim().parse::<IpAddr>() {
            Ok(ip) => self.location(ip),
            Err(_) => {
                log::warn!("Not an IPv4 or IPv6 address: {:?}", address);
                None
            }
        }
    }

    /// Reopen every open handle from its currently configured path.
    ///
    /// A handle whose reopen fails keeps serving its old data. The other
    /// handle is still reloaded, and the first error is returned.
    pub fn reload(&self) -> Result<()> {
        let mut handles = self.handles.write();
        let mut first_err = None;

        if let Some(kind) = handles.primary.as_ref().map(|(kind, _)| *kind) {
            match self.open(kind.database()) {
                Ok(fresh) => {
                    if let Some((_, old)) = handles.primary.replace((kind, fresh)) {
                        old.close();
                    }
                    log::info!("Reloaded {} database", kind);
                }
                Err(e) => {
                    log::warn!("Keeping previous {} database: {}", kind, e);
                    first_err = Some(e);
                }
            }
        }

        if handles.v6.is_some() {
            match self.open(DatabaseKind::Ipv6) {
                Ok(fresh) => {
                    if let Some(old) = handles.v6.replace(fresh) {
                        old.close();
                    }
                    log::info!("Reloaded ipv6 database");
                }
                Err(e) => {
                    log::warn!("Keeping previous ipv6 database: {}", e);
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every handle. Safe to call repeatedly.
    pub fn close(&self) {
        let mut handles = self.handles.write();
        if let Some((kind, handle)) = handles.primary.take() {
            handle.close();
            log::debug!("Closed {} database", kind);
        }
        if let Some(handle) = handles.v6.take() {
            handle.close();
            log::debug!("Closed ipv6 database");
        }
    }

    /// Kind served by the primary handle, if one is open.
    pub fn primary_kind(&self) -> Option<PrimaryKind> {
        self.handles.read().primary.as_ref().map(|(kind, _)| *kind)
    }

    /// Whether the IPv6 handle is open.
    pub fn has_ipv6(&self) -> bool {
        self.handles.read().v6.is_some()
    }

    /// Whether any handle is open.
    pub fn is_open(&self) -> bool {
        let handles = self.handles.read();
        handles.primary.is_some() || handles.v6.is_some()
    }
}

impl Drop for LookupManager {
    fn drop(&mut self) {
        self.close();
    }
}
