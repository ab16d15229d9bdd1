//! Opaque lookup backends.
//!
//! The manager never looks inside a database file. It asks a
//! [`DatabaseOpener`] for a [`LookupHandle`] and queries that.
//!
//! - [`MaxMindOpener`] reads MaxMind DB files.
//! - [`FixtureOpener`] reads a small CIDR text format, for tests and benches.

mod fixture;
mod maxmind;

pub use fixture::{FixtureDatabase, FixtureOpener, OpenStats};
pub use maxmind::MaxMindOpener;

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use crate::error::Result;
use crate::kind::DatabaseKind;

/// Country code returned when no country is known.
pub const UNKNOWN_COUNTRY_CODE: &str = "--";

/// Country name returned when no country is known.
pub const UNKNOWN_COUNTRY_NAME: &str = "N/A";

/// Country answer for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code
    pub code: String,
    /// English name
    pub name: String,
}

impl Country {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// The "country unknown" sentinel (`--` / `N/A`).
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_COUNTRY_CODE, UNKNOWN_COUNTRY_NAME)
    }

    /// Whether this is the sentinel record.
    pub fn is_unknown(&self) -> bool {
        self.code == UNKNOWN_COUNTRY_CODE
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// Location answer for an IPv4 address, from a city database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub metro_code: Option<u16>,
    pub time_zone: Option<String>,
}

impl Location {
    /// A location with coordinates only.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            country_code: None,
            country_name: None,
            region: None,
            city: None,
            postal_code: None,
            latitude,
            longitude,
            metro_code: None,
            time_zone: None,
        }
    }
}

/// An open, queryable database file.
pub trait LookupHandle: Send + Sync {
    /// Country for an address, or `None` if the database has no entry.
    fn country(&self, ip: IpAddr) -> Option<Country>;

    /// Location for an address, or `None` if the database has no entry
    /// or carries no location data.
    fn location(&self, ip: IpAddr) -> Option<Location>;

    /// Release the underlying file.
    fn close(self: Box<Self>);
}

/// Opens lookup handles from database files.
pub trait DatabaseOpener: Send + Sync {
    /// Open `path` as a database of the given kind.
    ///
    /// Missing, truncated or unreadable files fail with
    /// [`Error::CannotLoad`](crate::Error::CannotLoad).
    fn open(&self, kind: DatabaseKind, path: &Path) -> Result<Box<dyn LookupHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_country() {
        let unknown = Country::unknown();
        assert_eq!(unknown.code, "--");
        assert_eq!(unknown.name, "N/A");
        assert!(unknown.is_unknown());
        assert!(!Country::new("DE", "Germany").is_unknown());
    }

    #[test]
    fn test_country_display() {
        assert_eq!(Country::new("JP", "Japan").to_string(), "Japan (JP)");
    }
}
