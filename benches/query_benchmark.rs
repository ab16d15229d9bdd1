//! Benchmarks for lookup throughput through the manager.
//!
//! Run with: cargo bench
//!
//! Measures:
//! - Country lookups (hit and miss) with different database sizes
//! - Textual address parsing overhead
//! - Lookups contending with a concurrent reload

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geoip_tools::{Capability, FixtureOpener, LookupManager, Settings};
use std::fmt::Write as _;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

/// Write a fixture with `networks` /24 networks starting at 10.0.0.0.
fn build_manager(networks: u32) -> (TempDir, LookupManager) {
    let dir = tempfile::tempdir().unwrap();

    let mut text = String::new();
    for i in 0..networks {
        let base = Ipv4Addr::from(0x0A00_0000 + (i << 8));
        let code = if i % 2 == 0 { "US" } else { "DE" };
        writeln!(text, "{}/24,{},Country {}", base, code, i).unwrap();
    }
    fs::write(dir.path().join("GeoIP.dat"), text).unwrap();

    let settings = Settings::in_memory(dir.path()).into_shared();
    let manager = LookupManager::new(settings, Arc::new(FixtureOpener::new()));
    manager.ensure(Capability::Country).unwrap();
    (dir, manager)
}

fn bench_country_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("country_lookup");
    group.throughput(Throughput::Elements(1));

    for networks in [16u32, 256, 4096] {
        let (_dir, manager) = build_manager(networks);
        let hit: IpAddr = Ipv4Addr::new(10, 0, 0, 42).into();
        let miss: IpAddr = Ipv4Addr::new(192, 0, 2, 1).into();

        group.bench_with_input(BenchmarkId::new("hit", networks), &hit, |b, ip| {
            b.iter(|| black_box(manager.country(black_box(*ip))))
        });
        group.bench_with_input(BenchmarkId::new("miss", networks), &miss, |b, ip| {
            b.iter(|| black_box(manager.country(black_box(*ip))))
        });
    }

    group.finish();
}

fn bench_textual_lookup(c: &mut Criterion) {
    let (_dir, manager) = build_manager(256);

    c.bench_function("country_of_text", |b| {
        b.iter(|| black_box(manager.country_of(black_box("10.0.3.7"))))
    });
    c.bench_function("country_of_garbage", |b| {
        b.iter(|| black_box(manager.country_of(black_box("not-an-address"))))
    });
}

fn bench_lookup_during_reload(c: &mut Criterion) {
    let (_dir, manager) = build_manager(256);
    let ip: IpAddr = Ipv4Addr::new(10, 0, 1, 1).into();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                let _ = manager.reload();
            }
        });

        c.bench_function("country_during_reload", |b| {
            b.iter(|| black_box(manager.country(black_box(ip))))
        });

        stop.store(true, Ordering::Relaxed);
    });
}

criterion_group!(
    benches,
    bench_country_lookup,
    bench_textual_lookup,
    bench_lookup_during_reload
);
criterion_main!(benches);
