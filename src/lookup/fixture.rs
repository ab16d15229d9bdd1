//! Text fixture backend.
//!
//! Each non-empty, non-comment line describes one network:
//!
//! ```text
//! # cidr, country code, country name [, region, city, latitude, longitude]
//! 8.8.8.0/24,US,United States,CA,Mountain View,37.386,-122.0838
//! 2001:db8::/32,DE,Germany
//! ```
//!
//! The most specific matching network wins. A file with no entries is
//! rejected, which stands in for a truncated database.

use ipnet::IpNet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Country, DatabaseOpener, Location, LookupHandle};
use crate::error::{Error, Result};
use crate::kind::DatabaseKind;

#[derive(Debug, Clone)]
struct Entry {
    net: IpNet,
    country: Country,
    location: Option<Location>,
}

/// Parsed fixture contents.
#[derive(Debug, Clone, Default)]
pub struct FixtureDatabase {
    entries: Vec<Entry>,
}

impl FixtureDatabase {
    /// Parse fixture text.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut entries = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 3 && fields.len() != 7 {
                return Err(format!("line {}: expected 3 or 7 fields", idx + 1));
            }

            let net: IpNet = fields[0]
                .parse()
                .map_err(|e| format!("line {}: {}", idx + 1, e))?;
            let country = Country::new(fields[1], fields[2]);

            let location = if fields.len() == 7 {
                let latitude: f64 = fields[5]
                    .parse()
                    .map_err(|_| format!("line {}: bad latitude", idx + 1))?;
                let longitude: f64 = fields[6]
                    .parse()
                    .map_err(|_| format!("line {}: bad longitude", idx + 1))?;
                let mut location = Location::at(latitude, longitude);
                location.country_code = Some(country.code.clone());
                location.country_name = Some(country.name.clone());
                location.region = non_empty(fields[3]);
                location.city = non_empty(fields[4]);
                Some(location)
            } else {
                None
            };

            entries.push(Entry {
                net,
                country,
                location,
            });
        }

        if entries.is_empty() {
            return Err("database contains no entries".to_string());
        }

        Ok(Self { entries })
    }

    /// Number of networks in the fixture.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, ip: IpAddr) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.net.contains(&ip))
            .max_by_key(|e| e.net.prefix_len())
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Open/close counters shared by a [`FixtureOpener`] and its handles.
#[derive(Debug, Default)]
pub struct OpenStats {
    opens: [AtomicUsize; 3],
    closes: [AtomicUsize; 3],
}

impl OpenStats {
    fn slot(kind: DatabaseKind) -> usize {
        match kind {
            DatabaseKind::Country => 0,
            DatabaseKind::City => 1,
            DatabaseKind::Ipv6 => 2,
        }
    }

    /// Successful opens of a kind.
    pub fn opens(&self, kind: DatabaseKind) -> usize {
        self.opens[Self::slot(kind)].load(Ordering::SeqCst)
    }

    /// Closes of a kind.
    pub fn closes(&self, kind: DatabaseKind) -> usize {
        self.closes[Self::slot(kind)].load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed, across all kinds.
    pub fn open_handles(&self) -> usize {
        DatabaseKind::ALL
            .iter()
            .map(|&k| self.opens(k) - self.closes(k))
            .sum()
    }
}

/// Opens fixture files and counts handle lifecycles.
#[derive(Debug, Default)]
pub struct FixtureOpener {
    stats: Arc<OpenStats>,
    open_delay: Duration,
}

impl FixtureOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every open, to widen reload windows in tests.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Lifecycle counters.
    pub fn stats(&self) -> Arc<OpenStats> {
        self.stats.clone()
    }
}

impl DatabaseOpener for FixtureOpener {
    fn open(&self, kind: DatabaseKind, path: &Path) -> Result<Box<dyn LookupHandle>> {
        if !self.open_delay.is_zero() {
            thread::sleep(self.open_delay);
        }

        let text = fs::read_to_string(path).map_err(|e| Error::cannot_load(kind, path, e))?;
        let db = FixtureDatabase::parse(&text).map_err(|e| Error::cannot_load(kind, path, e))?;

        self.stats.opens[OpenStats::slot(kind)].fetch_add(1, Ordering::SeqCst);
        log::debug!("Opened {} fixture {:?} ({} networks)", kind, path, db.len());

        Ok(Box::new(FixtureHandle {
            kind,
            db,
            stats: self.stats.clone(),
        }))
    }
}

struct FixtureHandle {
    kind: DatabaseKind,
    db: FixtureDatabase,
    stats: Arc<OpenStats>,
}

impl LookupHandle for FixtureHandle {
    fn country(&self, ip: IpAddr) -> Option<Country> {
        self.db.find(ip).map(|e| e.country.clone())
    }

    fn location(&self, ip: IpAddr) -> Option<Location> {
        self.db.find(ip).and_then(|e| e.location.clone())
    }

    fn close(self: Box<Self>) {
        self.stats.closes[OpenStats::slot(self.kind)].fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
# sample
8.8.0.0/16,US,United States
8.8.8.0/24,US,United States,CA,Mountain View,37.386,-122.0838
81.2.69.0/24,GB,United Kingdom,ENG,London,51.5142,-0.0931
2001:db8::/32,DE,Germany
";

    #[test]
    fn test_parse_and_find() {
        let db = FixtureDatabase::parse(SAMPLE).unwrap();
        assert_eq!(db.len(), 4);

        let entry = db.find("8.8.8.8".parse().unwrap()).unwrap();
        assert_eq!(entry.country.code, "US");
        // Most specific network carries the location
        assert!(entry.location.is_some());

        let entry = db.find("8.8.4.4".parse().unwrap()).unwrap();
        assert!(entry.location.is_none());

        assert!(db.find("10.0.0.1".parse().unwrap()).is_none());
        assert_eq!(
            db.find("2001:db8::1".parse().unwrap()).unwrap().country.code,
            "DE"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(FixtureDatabase::parse("").is_err());
        assert!(FixtureDatabase::parse("# only a comment\n").is_err());
        assert!(FixtureDatabase::parse("not-a-cidr,US,United States").is_err());
        assert!(FixtureDatabase::parse("1.0.0.0/8,US").is_err());
        assert!(FixtureDatabase::parse("1.0.0.0/8,US,X,R,C,north,0").is_err());
    }

    #[test]
    fn test_opener_counts_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GeoLiteCity.dat");
        fs::write(&path, SAMPLE).unwrap();

        let opener = FixtureOpener::new();
        let stats = opener.stats();

        let handle = opener.open(DatabaseKind::City, &path).unwrap();
        assert_eq!(stats.opens(DatabaseKind::City), 1);
        assert_eq!(stats.open_handles(), 1);

        let location = handle.location("81.2.69.160".parse().unwrap()).unwrap();
        assert_eq!(location.city.as_deref(), Some("London"));
        assert_eq!(location.region.as_deref(), Some("ENG"));

        handle.close();
        assert_eq!(stats.closes(DatabaseKind::City), 1);
        assert_eq!(stats.open_handles(), 0);
    }

    #[test]
    fn test_opener_rejects_missing_and_truncated() {
        let dir = tempdir().unwrap();
        let opener = FixtureOpener::new();

        let missing = dir.path().join("GeoIP.dat");
        assert!(matches!(
            opener.open(DatabaseKind::Country, &missing),
            Err(Error::CannotLoad { .. })
        ));

        fs::write(&missing, "").unwrap();
        assert!(matches!(
            opener.open(DatabaseKind::Country, &missing),
            Err(Error::CannotLoad { .. })
        ));
        assert_eq!(opener.stats().opens(DatabaseKind::Country), 0);
    }
}
