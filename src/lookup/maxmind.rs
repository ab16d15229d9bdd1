//! MaxMind DB backend.

use maxminddb::Reader;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use super::{Country, DatabaseOpener, Location, LookupHandle};
use crate::error::{Error, Result};
use crate::kind::DatabaseKind;

/// Opens `.mmdb` files with `maxminddb`.
///
/// The file is read into memory, so the path can be replaced on disk while
/// the handle stays usable.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxMindOpener;

impl DatabaseOpener for MaxMindOpener {
    fn open(&self, kind: DatabaseKind, path: &Path) -> Result<Box<dyn LookupHandle>> {
        let reader =
            Reader::open_readfile(path).map_err(|e| Error::cannot_load(kind, path, e))?;

        log::info!(
            "Opened {} database {:?} ({}, built {})",
            kind,
            path,
            reader.metadata.database_type,
            reader.metadata.build_epoch
        );

        Ok(Box::new(MaxMindHandle {
            kind,
            path: path.to_path_buf(),
            reader,
        }))
    }
}

struct MaxMindHandle {
    kind: DatabaseKind,
    path: PathBuf,
    reader: Reader<Vec<u8>>,
}

#[derive(Deserialize)]
struct Names {
    names: Option<BTreeMap<String, String>>,
    iso_code: Option<String>,
}

impl Names {
    fn english(&self) -> Option<String> {
        self.names.as_ref()?.get("en").cloned()
    }
}

#[derive(Deserialize)]
struct CountryRecord {
    country: Option<Names>,
}

#[derive(Deserialize)]
struct CityLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    metro_code: Option<u16>,
    time_zone: Option<String>,
}

#[derive(Deserialize)]
struct Postal {
    code: Option<String>,
}

#[derive(Deserialize)]
struct CityRecord {
    country: Option<Names>,
    city: Option<Names>,
    subdivisions: Option<Vec<Names>>,
    location: Option<CityLocation>,
    postal: Option<Postal>,
}

impl LookupHandle for MaxMindHandle {
    fn country(&self, ip: IpAddr) -> Option<Country> {
        let record: CountryRecord = self.reader.lookup(ip).ok()?;
        let country = record.country?;
        let name = country.english().unwrap_or_default();
        Some(Country::new(country.iso_code?, name))
    }

    fn location(&self, ip: IpAddr) -> Option<Location> {
        let record: CityRecord = self.reader.lookup(ip).ok()?;
        let coords = record.location?;

        let mut location = Location::at(coords.latitude?, coords.longitude?);
        location.metro_code = coords.metro_code;
        location.time_zone = coords.time_zone;
        if let Some(country) = &record.country {
            location.country_code = country.iso_code.clone();
            location.country_name = country.english();
        }
        location.region = record
            .subdivisions
            .as_ref()
            .and_then(|s| s.first())
            .and_then(|s| s.iso_code.clone());
        location.city = record.city.as_ref().and_then(Names::english);
        location.postal_code = record.postal.and_then(|p| p.code);
        Some(location)
    }

    fn close(self: Box<Self>) {
        log::debug!("Closed {} database {:?}", self.kind, self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GeoIP.dat");
        let result = MaxMindOpener.open(DatabaseKind::Country, &path);
        assert!(matches!(
            result,
            Err(Error::CannotLoad {
                kind: DatabaseKind::Country,
                ..
            })
        ));
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GeoLiteCity.dat");
        std::fs::write(&path, b"definitely not a maxmind database").unwrap();
        let result = MaxMindOpener.open(DatabaseKind::City, &path);
        assert!(matches!(result, Err(Error::CannotLoad { .. })));
    }
}
