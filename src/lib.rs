//! GeoIP Tools - GeoIP lookups backed by local database files that refresh
//! themselves.
//!
//! This crate answers "which country/city is this IP address in?" from
//! local database files, and keeps those files fresh by downloading newer
//! copies from configurable URLs without interrupting lookups.
//!
//! # Features
//!
//! - **Country lookups**: IPv4 via the country or city database, IPv6 via a
//!   separate IPv6 database
//! - **Location lookups**: Region, city, coordinates and more for IPv4
//! - **Hot reload**: Files are swapped under a lock; queries never see a
//!   closed database
//! - **Conditional downloads**: `If-Modified-Since`, gzip decoding, atomic
//!   file replacement
//! - **Background refresh**: On command or on a timer, one cycle at a time
//! - **Pluggable backends**: MaxMind `.mmdb` files, or text fixtures for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use geoip_tools::{Capability, GeoIpTools, MaxMindOpener, Settings};
//! use std::sync::Arc;
//!
//! let settings = Settings::load("plugins/GeoIPTools/config.yml", "plugins/GeoIPTools")?;
//! let tools = GeoIpTools::new(settings.into_shared(), Arc::new(MaxMindOpener));
//!
//! // Download missing or stale databases
//! tools.on_load();
//!
//! let geo = tools.lookup(Capability::CountryIpv6)?;
//! println!("{}", geo.country_of("8.8.8.8"));
//! println!("{}", geo.country_of("2001:4860:4860::8888"));
//! ```
//!
//! # Capabilities
//!
//! - **Country**: IPv4 country lookups
//! - **City**: IPv4 country and location lookups
//! - **Ipv6**: IPv6 country lookups only
//! - **CountryIpv6** / **CityIpv6**: the above plus IPv6 country lookups
//!
//! Country and City are mutually exclusive. Asking for City after Country
//! replaces the country database, since the city database answers country
//! queries too.
//!
//! # Refresh Cycle
//!
//! 1. Download each configured database not overridden by a user path
//! 2. Record failures per database, keeping the existing file
//! 3. Reopen every open database from its current path

mod error;
mod kind;
mod manager;
mod settings;
mod tools;

pub mod fetch;
pub mod lookup;
pub mod scheduler;

pub use error::{Error, Result};
pub use fetch::{DatabaseFetcher, FetchOutcome, KindReport, KindStatus, SkipReason, UpdateReport};
pub use kind::{
    Capability, DatabaseKind, PrimaryKind, DEFAULT_CITY_URL, DEFAULT_COUNTRY_URL, DEFAULT_IPV6_URL,
};
pub use lookup::{
    Country, DatabaseOpener, FixtureOpener, Location, LookupHandle, MaxMindOpener, OpenStats,
};
pub use manager::LookupManager;
pub use scheduler::{
    CycleOutcome, CycleStage, LogSink, ProgressSink, RefreshScheduler, RefreshState,
    TriggerOutcome, DEFAULT_CHECK_PERIOD,
};
pub use settings::{Settings, SharedSettings, DEFAULT_DATA_DIR, DEFAULT_UPDATE_INTERVAL};
pub use tools::{GeoIpTools, Principal, COMMAND_LABEL, MESSAGE_PREFIX, UPDATE_PERMISSION};
