//! Integration tests for database lifecycle through the public API.

use geoip_tools::{
    Capability, DatabaseKind, FixtureOpener, GeoIpTools, LookupManager, PrimaryKind, Settings,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const COUNTRY: &str = "\
8.8.8.0/24,US,United States
1.1.1.0/24,AU,Australia
";

const CITY: &str = "\
8.8.8.0/24,US,United States,CA,Mountain View,37.386,-122.0838
81.2.69.0/24,GB,United Kingdom,ENG,London,51.5142,-0.0931
";

const IPV6: &str = "2001:4860::/32,US,United States\n";

/// Write all three databases at their default locations.
fn seed(dir: &Path) {
    fs::write(dir.join("GeoIP.dat"), COUNTRY).unwrap();
    fs::write(dir.join("GeoLiteCity.dat"), CITY).unwrap();
    fs::write(dir.join("GeoIPv6.dat"), IPV6).unwrap();
}

#[test]
fn test_capability_upgrade_path() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let opener = Arc::new(FixtureOpener::new());
    let stats = opener.stats();
    let settings = Settings::in_memory(dir.path()).into_shared();
    let manager = LookupManager::new(settings, opener);

    manager.ensure(Capability::Country).unwrap();
    assert_eq!(manager.country_of("1.1.1.1").code, "AU");
    assert!(manager.location_of("8.8.8.8").is_none());

    manager.ensure(Capability::CityIpv6).unwrap();
    assert_eq!(manager.primary_kind(), Some(PrimaryKind::City));
    assert_eq!(stats.closes(DatabaseKind::Country), 1);

    // City database answers country queries too
    assert_eq!(manager.country_of("81.2.69.160").name, "United Kingdom");
    assert!(manager.country_of("1.1.1.1").is_unknown());
    assert_eq!(manager.country_of("2001:4860:4860::8888").code, "US");

    let location = manager.location_of("8.8.8.8").unwrap();
    assert_eq!(location.city.as_deref(), Some("Mountain View"));
    assert!((location.latitude - 37.386).abs() < 1e-9);

    // Downgrading is not a thing
    manager.ensure(Capability::Country).unwrap();
    assert_eq!(manager.primary_kind(), Some(PrimaryKind::City));

    drop(manager);
    assert_eq!(stats.open_handles(), 0);
}

#[test]
fn test_capability_parsing() {
    assert_eq!("country".parse::<Capability>().unwrap(), Capability::Country);
    assert_eq!("City+IPv6".parse::<Capability>().unwrap(), Capability::CityIpv6);
    assert!("country+city".parse::<Capability>().is_err());
    assert!(Capability::from_flags(false, false, false).is_err());
    assert_eq!(
        Capability::from_flags(false, false, true).unwrap(),
        Capability::Ipv6
    );
}

#[test]
fn test_garbage_input_yields_sentinel() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    let tools = GeoIpTools::new(
        Settings::in_memory(dir.path()).into_shared(),
        Arc::new(FixtureOpener::new()),
    );
    let geo = tools.lookup(Capability::CountryIpv6).unwrap();

    for text in ["", "example.com", "256.1.1.1", "8.8.8", "::g"] {
        assert!(geo.country_of(text).is_unknown(), "{:?}", text);
        assert!(geo.location_of(text).is_none());
    }
    assert_eq!(geo.country_of(" 8.8.8.8 ").code, "US");
}

#[test]
fn test_user_path_override() {
    let dir = tempdir().unwrap();
    seed(dir.path());
    let custom = dir.path().join("custom-country.txt");
    fs::write(&custom, "8.8.8.0/24,CH,Switzerland\n").unwrap();

    let mut settings = Settings::in_memory(dir.path());
    settings.set_database_path(DatabaseKind::Country, &custom);
    assert!(settings.is_path_overridden(DatabaseKind::Country));
    assert!(!settings.is_path_overridden(DatabaseKind::City));

    let manager = LookupManager::new(settings.into_shared(), Arc::new(FixtureOpener::new()));
    manager.ensure_country().unwrap();
    assert_eq!(manager.country_of("8.8.8.8").code, "CH");
}

#[test]
fn test_queries_during_reload_never_see_sentinel() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    let opener = FixtureOpener::new().with_open_delay(Duration::from_millis(20));
    let stats = opener.stats();
    let settings = Settings::in_memory(dir.path()).into_shared();
    let manager = LookupManager::new(settings, Arc::new(opener));
    manager.ensure(Capability::CountryIpv6).unwrap();

    let done = AtomicBool::new(false);
    let queries = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let v4 = manager.country_of("8.8.8.8");
                    let v6 = manager.country_of("2001:4860::1");
                    assert_eq!(v4.code, "US");
                    assert_eq!(v6.code, "US");
                    queries.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        for _ in 0..10 {
            manager.reload().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert!(queries.load(Ordering::Relaxed) > 0);
    assert_eq!(stats.opens(DatabaseKind::Country), 11);
    assert_eq!(stats.closes(DatabaseKind::Country), 10);
    assert_eq!(stats.open_handles(), 2);
}

#[test]
fn test_settings_file_round_trip() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("config.yml");

    let mut settings = Settings::load(&file, dir.path()).unwrap();
    assert!(file.exists());
    settings.set_updater_disabled(true);
    settings.set_database_url(DatabaseKind::City, "https://mirror.example/city.mmdb.gz");
    settings.save().unwrap();

    let reloaded = Settings::load(&file, dir.path()).unwrap();
    assert!(reloaded.is_updater_disabled());
    assert_eq!(
        reloaded.database_url(DatabaseKind::City),
        "https://mirror.example/city.mmdb.gz"
    );
    assert!(!reloaded.is_path_overridden(DatabaseKind::City));

    let text = fs::read_to_string(&file).unwrap();
    assert!(text.contains("URL.CountryDatabase"));
    assert!(!text.contains("Path.countryDatabase"));
}
