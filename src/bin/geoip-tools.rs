//! geoip-tools: CLI for refreshing GeoIP databases and running lookups.

use clap::{Parser, Subcommand};
use geoip_tools::{
    Capability, Country, CycleOutcome, DatabaseKind, GeoIpTools, Location, MaxMindOpener,
    ProgressSink, Settings, DEFAULT_DATA_DIR,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "geoip-tools")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Keep GeoIP databases fresh and look up addresses", long_about = None)]
struct Cli {
    /// Settings file (created with defaults if missing)
    #[arg(short, long, global = true, default_value = "./plugins/GeoIPTools/config.yml")]
    config: PathBuf,

    /// Directory holding the database files
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download newer databases
    Update,

    /// Look up one or more addresses
    Lookup {
        /// IPv4 or IPv6 addresses
        #[arg(required = true)]
        addresses: Vec<String>,

        /// Databases to open, e.g. "country", "city+ipv6"
        #[arg(short = 'C', long, default_value = "city+ipv6")]
        capability: Capability,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings
    Settings,

    /// Refresh databases periodically until interrupted
    Watch {
        /// Seconds between checks
        #[arg(short, long, default_value_t = 3600)]
        interval: u64,
    },
}

/// Prints cycle progress to stdout.
struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn message(&self, text: &str) {
        println!("{}", text);
    }
}

#[derive(Serialize)]
struct LookupOutput<'a> {
    address: &'a str,
    country: Country,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<Location>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Update => update(&cli.config, &cli.data_dir),
        Commands::Lookup {
            addresses,
            capability,
            json,
        } => lookup(&cli.config, &cli.data_dir, &addresses, capability, json),
        Commands::Settings => print_settings(&cli.config, &cli.data_dir),
        Commands::Watch { interval } => watch(&cli.config, &cli.data_dir, interval),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_tools(config: &PathBuf, data_dir: &PathBuf) -> Result<GeoIpTools, Box<dyn std::error::Error>> {
    let settings = Settings::load(config, data_dir)?;
    Ok(GeoIpTools::new(settings.into_shared(), Arc::new(MaxMindOpener)))
}

fn update(config: &PathBuf, data_dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let tools = open_tools(config, data_dir)?;

    match tools.scheduler().run_now(&StdoutSink) {
        Some(CycleOutcome::Completed(report)) => {
            println!();
            for kind in &report.kinds {
                println!("  {:<8} {:?}  {}", kind.kind.name(), kind.status, kind.path.display());
            }
            if report.is_degraded() {
                println!("\nSome databases could not be updated; existing files were kept.");
            }
            Ok(())
        }
        Some(CycleOutcome::Failed { stage, message }) => {
            Err(format!("update failed while {:?}: {}", stage, message).into())
        }
        None => Err("an update is already running".into()),
    }
}

fn lookup(
    config: &PathBuf,
    data_dir: &PathBuf,
    addresses: &[String],
    capability: Capability,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tools = open_tools(config, data_dir)?;
    let geo = tools.lookup(capability)?;

    let results: Vec<LookupOutput> = addresses
        .iter()
        .map(|address| LookupOutput {
            address,
            country: geo.country_of(address),
            location: geo.location_of(address),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        println!("{}: {}", result.address, result.country);
        if let Some(location) = &result.location {
            let place: Vec<&str> = [location.city.as_deref(), location.region.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if !place.is_empty() {
                println!("  {}", place.join(", "));
            }
            println!("  ({:.4}, {:.4})", location.latitude, location.longitude);
            if let Some(tz) = &location.time_zone {
                println!("  {}", tz);
            }
        }
    }

    tools.shutdown();
    Ok(())
}

fn print_settings(config: &PathBuf, data_dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(config, data_dir)?;

    println!("Settings file: {}", config.display());
    for (key, value) in settings.entries() {
        println!("  {}: {}", key, value);
    }

    println!("\nDatabases:");
    for kind in DatabaseKind::ALL {
        let marker = if settings.is_path_overridden(kind) {
            " (user managed)"
        } else {
            ""
        };
        println!("  {:<8} {}{}", kind.name(), settings.database_path(kind).display(), marker);
    }

    println!(
        "\nUpdater {}, update due: {}",
        if settings.is_updater_disabled() { "disabled" } else { "enabled" },
        settings.needs_update()
    );
    Ok(())
}

fn watch(config: &PathBuf, data_dir: &PathBuf, interval: u64) -> Result<(), Box<dyn std::error::Error>> {
    if interval == 0 {
        return Err("interval must be at least one second".into());
    }

    let tools = open_tools(config, data_dir)?;
    tools.on_load();
    tools.start_periodic(Duration::from_secs(interval))?;

    println!("Watching for database updates every {}s, press Ctrl-C to stop", interval);
    loop {
        std::thread::park();
    }
}
