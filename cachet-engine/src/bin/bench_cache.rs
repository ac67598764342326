//! # Cache Benchmark Harness
//!
//! Purpose: Provide a dependency-free, repeatable benchmark driver for
//! the cache so baseline throughput and latency can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: A fixed-seed generator picks keys, so
//!    two runs on the same build touch the same slots in the same order.
//! 2. **Allocation Control**: Keys are built once up front; the measured
//!    loops only hash, probe, and swap.
//! 3. **Hot-Path Phases**: GET, SET, and the singleflight load path are
//!    timed separately; they stress different machinery.

use std::time::{Duration, Instant};

use cachet_engine::{value_of, Cache, CacheResult, Config};

const DEFAULT_KEY_COUNT: usize = 1 << 16;
const DEFAULT_OP_COUNT: usize = 1_000_000;

/// Workload shape, taken from `bench_cache [keys] [ops]`.
///
/// The key count rounds up to a power of two so the generator can mask
/// instead of dividing.
struct Workload {
    key_count: usize,
    op_count: usize,
}

impl Workload {
    fn from_args() -> Self {
        let mut args = std::env::args().skip(1);
        let mut next = |fallback: usize| {
            args.next()
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(fallback)
        };

        Workload {
            key_count: next(DEFAULT_KEY_COUNT).next_power_of_two(),
            op_count: next(DEFAULT_OP_COUNT),
        }
    }

    fn key_mask(&self) -> usize {
        self.key_count - 1
    }
}

/// SplitMix64 sequence over the key space.
///
/// Chosen over an external RNG crate: two multiplies and three shifts
/// per draw, full 64-bit period, trivially seedable.
struct KeyPicker {
    state: u64,
    mask: usize,
}

impl KeyPicker {
    fn new(seed: u64, mask: usize) -> Self {
        KeyPicker { state: seed, mask }
    }

    #[inline]
    fn pick(&mut self) -> usize {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut mixed = self.state;
        mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        (mixed ^ (mixed >> 31)) as usize & self.mask
    }
}

fn build_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("bench/{i:08}")).collect()
}

/// Times `body` over `ops` iterations and prints one result line.
fn phase(label: &str, ops: usize, body: impl FnOnce() -> CacheResult<()>) -> CacheResult<()> {
    let start = Instant::now();
    body()?;
    let elapsed = start.elapsed();

    let per_op = elapsed
        .checked_div(ops as u32)
        .unwrap_or(Duration::ZERO);
    let mops = ops as f64 / elapsed.as_secs_f64() / 1e6;
    println!("{label:<12} {ops:>9} ops  {elapsed:>8.3?}  {mops:>7.2} Mops/s  {per_op:?}/op");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("bench_cache failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> CacheResult<()> {
    let workload = Workload::from_args();
    let cache = Cache::new(Config::with_max_size(workload.key_count));

    let keys = build_keys(workload.key_count);
    for (i, key) in keys.iter().enumerate() {
        cache.set(key, value_of(i as u64));
    }

    println!(
        "workload: keys={} ops={} per phase",
        workload.key_count, workload.op_count
    );

    let mut picker = KeyPicker::new(0xcafe_f00d, workload.key_mask());
    phase("GET", workload.op_count, || {
        for _ in 0..workload.op_count {
            std::hint::black_box(cache.get(&keys[picker.pick()]));
        }
        Ok(())
    })?;

    let mut picker = KeyPicker::new(0xdead_beef, workload.key_mask());
    phase("SET", workload.op_count, || {
        for _ in 0..workload.op_count {
            let idx = picker.pick();
            cache.set(&keys[idx], value_of(idx as u64));
        }
        Ok(())
    })?;

    let mut picker = KeyPicker::new(0x0dd_ba11, workload.key_mask());
    phase("GET_OR_LOAD", workload.op_count, || {
        for _ in 0..workload.op_count {
            let idx = picker.pick();
            let value = cache.get_or_load(&keys[idx], || Ok(Some(value_of(0u64))))?;
            std::hint::black_box(value);
        }
        Ok(())
    })?;

    let stats = cache.stats();
    println!(
        "stats: size={} capacity={} hits={} misses={} evictions={}",
        stats.size, stats.capacity, stats.hits, stats.misses, stats.evictions
    );

    Ok(())
}
