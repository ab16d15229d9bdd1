//! Database kinds and capability requests.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Mirror URL for the country database.
pub const DEFAULT_COUNTRY_URL: &str =
    "https://cdn.jsdelivr.net/npm/geolite2-country/GeoLite2-Country.mmdb.gz";

/// Mirror URL for the city database.
pub const DEFAULT_CITY_URL: &str =
    "https://cdn.jsdelivr.net/npm/geolite2-city/GeoLite2-City.mmdb.gz";

/// Mirror URL for the IPv6 database.
///
/// The MaxMind format carries both address families in one file, so this
/// points at the country database as well.
pub const DEFAULT_IPV6_URL: &str = DEFAULT_COUNTRY_URL;

/// The kind of data a database file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    /// IPv4 address to country
    Country,
    /// IPv4 address to country and location
    City,
    /// IPv6 address to country
    Ipv6,
}

impl DatabaseKind {
    /// All kinds, in update order.
    pub const ALL: [DatabaseKind; 3] = [DatabaseKind::Country, DatabaseKind::City, DatabaseKind::Ipv6];

    /// Get the internal name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseKind::Country => "country",
            DatabaseKind::City => "city",
            DatabaseKind::Ipv6 => "ipv6",
        }
    }

    /// File name used when the path has not been overridden.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            DatabaseKind::Country => "GeoIP.dat",
            DatabaseKind::City => "GeoLiteCity.dat",
            DatabaseKind::Ipv6 => "GeoIPv6.dat",
        }
    }

    /// Download source used when the URL has not been overridden.
    pub fn default_url(&self) -> &'static str {
        match self {
            DatabaseKind::Country => DEFAULT_COUNTRY_URL,
            DatabaseKind::City => DEFAULT_CITY_URL,
            DatabaseKind::Ipv6 => DEFAULT_IPV6_URL,
        }
    }

    /// Settings key holding the database path.
    pub fn path_key(&self) -> &'static str {
        match self {
            DatabaseKind::Country => "Path.countryDatabase",
            DatabaseKind::City => "Path.cityDatabase",
            DatabaseKind::Ipv6 => "Path.IPv6Database",
        }
    }

    /// Settings key holding the download URL.
    pub fn url_key(&self) -> &'static str {
        match self {
            DatabaseKind::Country => "URL.CountryDatabase",
            DatabaseKind::City => "URL.CityDatabase",
            DatabaseKind::Ipv6 => "URL.IPv6Database",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind served by the primary (IPv4) handle.
///
/// Country and City are mutually exclusive; City answers everything
/// Country does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryKind {
    Country,
    City,
}

impl PrimaryKind {
    /// The database kind backing this primary kind.
    pub fn database(self) -> DatabaseKind {
        match self {
            PrimaryKind::Country => DatabaseKind::Country,
            PrimaryKind::City => DatabaseKind::City,
        }
    }
}

impl fmt::Display for PrimaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.database().fmt(f)
    }
}

/// A request for a set of lookup capabilities.
///
/// Country and City cannot be combined, so the valid combinations are
/// spelled out instead of being composed from flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Country,
    City,
    Ipv6,
    CountryIpv6,
    CityIpv6,
}

impl Capability {
    /// Build a capability from individual flags.
    ///
    /// Fails when both Country and City are requested, or when nothing is.
    pub fn from_flags(country: bool, city: bool, ipv6: bool) -> Result<Self> {
        match (country, city, ipv6) {
            (true, false, false) => Ok(Capability::Country),
            (false, true, false) => Ok(Capability::City),
            (false, false, true) => Ok(Capability::Ipv6),
            (true, false, true) => Ok(Capability::CountryIpv6),
            (false, true, true) => Ok(Capability::CityIpv6),
            (true, true, _) => Err(Error::InvalidCapability(
                "country and city databases cannot be combined".to_string(),
            )),
            (false, false, false) => Err(Error::InvalidCapability(
                "no database requested".to_string(),
            )),
        }
    }

    /// Primary kind this capability needs, if any.
    pub fn primary(&self) -> Option<PrimaryKind> {
        match self {
            Capability::Country | Capability::CountryIpv6 => Some(PrimaryKind::Country),
            Capability::City | Capability::CityIpv6 => Some(PrimaryKind::City),
            Capability::Ipv6 => None,
        }
    }

    /// Whether this capability needs the IPv6 database.
    pub fn wants_ipv6(&self) -> bool {
        matches!(
            self,
            Capability::Ipv6 | Capability::CountryIpv6 | Capability::CityIpv6
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Country => "country",
            Capability::City => "city",
            Capability::Ipv6 => "ipv6",
            Capability::CountryIpv6 => "country+ipv6",
            Capability::CityIpv6 => "city+ipv6",
        };
        f.write_str(s)
    }
}

impl FromStr for Capability {
    type Err = Error;

    /// Parse a `+`-separated list such as `city+ipv6` (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let (mut country, mut city, mut ipv6) = (false, false, false);
        for part in s.split('+').map(str::trim) {
            match part.to_lowercase().as_str() {
                "country" => country = true,
                "city" => city = true,
                "ipv6" | "v6" => ipv6 = true,
                other => {
                    return Err(Error::InvalidCapability(format!(
                        "unknown database {:?}",
                        other
                    )))
                }
            }
        }
        Self::from_flags(country, city, ipv6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_keys() {
        assert_eq!(DatabaseKind::Country.path_key(), "Path.countryDatabase");
        assert_eq!(DatabaseKind::City.path_key(), "Path.cityDatabase");
        assert_eq!(DatabaseKind::Ipv6.path_key(), "Path.IPv6Database");
        assert_eq!(DatabaseKind::Country.url_key(), "URL.CountryDatabase");
        assert_eq!(DatabaseKind::City.url_key(), "URL.CityDatabase");
        assert_eq!(DatabaseKind::Ipv6.url_key(), "URL.IPv6Database");
    }

    #[test]
    fn test_default_file_names() {
        assert_eq!(DatabaseKind::Country.default_file_name(), "GeoIP.dat");
        assert_eq!(DatabaseKind::City.default_file_name(), "GeoLiteCity.dat");
        assert_eq!(DatabaseKind::Ipv6.default_file_name(), "GeoIPv6.dat");
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(
            Capability::from_flags(true, false, false).unwrap(),
            Capability::Country
        );
        assert_eq!(
            Capability::from_flags(false, true, true).unwrap(),
            Capability::CityIpv6
        );
        assert!(Capability::from_flags(true, true, false).is_err());
        assert!(Capability::from_flags(true, true, true).is_err());
        assert!(Capability::from_flags(false, false, false).is_err());
    }

    #[test]
    fn test_parse_capability() {
        assert_eq!("country".parse::<Capability>().unwrap(), Capability::Country);
        assert_eq!("City+IPv6".parse::<Capability>().unwrap(), Capability::CityIpv6);
        assert_eq!("ipv6".parse::<Capability>().unwrap(), Capability::Ipv6);
        assert!("country+city".parse::<Capability>().is_err());
        assert!("asn".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_display_roundtrip() {
        for cap in [
            Capability::Country,
            Capability::City,
            Capability::Ipv6,
            Capability::CountryIpv6,
            Capability::CityIpv6,
        ] {
            assert_eq!(cap.to_string().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn test_capability_parts() {
        assert_eq!(Capability::CityIpv6.primary(), Some(PrimaryKind::City));
        assert!(Capability::CityIpv6.wants_ipv6());
        assert_eq!(Capability::Ipv6.primary(), None);
        assert!(!Capability::Country.wants_ipv6());
    }
}
