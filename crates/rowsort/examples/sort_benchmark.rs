//! Benchmark: external sort of generated order rows.
//!
//! Generates rows on the fly (the input is never materialized), sorts them
//! by region ascending and amount descending with the external strategy,
//! verifies the order and compares against the in-memory strategy on a
//! prefix of the data.
//!
//! Default configuration sorts 2M rows. Override with:
//!   ROWSORT_BENCH_ROWS=10000000 cargo run ...
//! Sort settings are read from the usual ROWSORT_* variables, e.g.
//!   ROWSORT_MAX_ROWS_PER_CHUNK=50000
//!
//! Run with:
//!   RUST_LOG=rowsort=debug cargo run -p rowsort --release --example sort_benchmark

use std::time::Instant;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rowsort::{
    DataCell, DataType, ExecutionMonitor, Row, RowComparator, RowTable, SortConfig, TableSorter,
    TableSpec,
};

fn num_rows() -> u64 {
    std::env::var("ROWSORT_BENCH_ROWS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2_000_000)
}

const VERIFY_PREFIX: u64 = 100_000;

const REGIONS: &[&str] = &[
    "North", "South", "East", "West", "Central",
    "Northeast", "Southeast", "Northwest", "Southwest", "Midwest",
];

// ── Simple xorshift64 PRNG ─────────────────────────────────────────────

struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    #[inline]
    fn next_i64_range(&mut self, max: i64) -> i64 {
        (self.next_u64() % max as u64) as i64
    }

    #[inline]
    fn next_f64_range(&mut self, min: f64, max: f64) -> f64 {
        let t = (self.next_u64() as f64) / (u64::MAX as f64);
        min + t * (max - min)
    }
}

fn spec() -> TableSpec {
    TableSpec::from_pairs(&[
        ("region", DataType::String),
        ("amount", DataType::Double),
        ("quantity", DataType::Integer),
        ("returned", DataType::Boolean),
    ])
    .expect("valid spec")
}

/// Endless stream of order rows; every 50th amount is missing.
fn orders(seed: u64) -> impl Iterator<Item = Row> {
    let mut rng = Rng::new(seed);
    (0u64..).map(move |i| {
        let region = REGIONS[rng.next_i64_range(REGIONS.len() as i64) as usize];
        let amount = if i % 50 == 0 {
            DataCell::Missing
        } else {
            DataCell::Double((rng.next_f64_range(1.0, 5000.0) * 100.0).round() / 100.0)
        };
        Row::new(
            format!("order-{:09}", i),
            vec![
                region.into(),
                amount,
                DataCell::Integer(1 + rng.next_i64_range(20)),
                DataCell::Boolean(rng.next_i64_range(100) < 3),
            ],
        )
    })
}

fn setup_tracing(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.parse()?)
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing("info")?;

    let n = num_rows();
    let config = SortConfig::from_env();
    config.validate()?;
    tracing::info!(rows = n, ?config, "starting benchmark");

    // ── External sort ──────────────────────────────────────────────────
    let last_tenth = std::sync::Mutex::new(0u32);
    let exec = ExecutionMonitor::with_listener(move |progress, message| {
        let tenth = (progress * 10.0) as u32;
        let mut last = last_tenth.lock().unwrap_or_else(|e| e.into_inner());
        if tenth > *last {
            *last = tenth;
            tracing::info!("{:>3.0}% {}", progress * 100.0, message);
        }
    });

    let t0 = Instant::now();
    let sorted = TableSorter::new(spec(), orders(42).take(n as usize).map(Ok), Some(n))
        .sort_columns(&["region", "amount"], &[true, false])?
        .config(config.clone())?
        .sort(&exec)?;
    let sort_time = t0.elapsed();
    tracing::info!(
        rows = sorted.row_count(),
        stats = ?sorted.stats(),
        secs = sort_time.as_secs_f64(),
        rows_per_sec = (n as f64 / sort_time.as_secs_f64()) as u64,
        "external sort finished"
    );

    // ── Verify order ───────────────────────────────────────────────────
    let t0 = Instant::now();
    let comparator =
        RowComparator::for_columns(sorted.spec(), &["region", "amount"], &[true, false], false)?;
    let mut previous: Option<Row> = None;
    let mut count = 0u64;
    for row in sorted.iter()? {
        let row = row?;
        if let Some(prev) = &previous {
            if comparator.compare(prev, &row) == std::cmp::Ordering::Greater {
                return Err(format!("rows out of order: {} before {}", prev, row).into());
            }
        }
        previous = Some(row);
        count += 1;
    }
    if count != n {
        return Err(format!("expected {} rows, read {}", n, count).into());
    }
    tracing::info!(secs = t0.elapsed().as_secs_f64(), "order verified");

    // ── Strategies agree on a prefix ───────────────────────────────────
    let prefix = RowTable::new(spec(), orders(7).take(VERIFY_PREFIX.min(n) as usize).collect())?;
    let by_strategy = |in_memory: bool| -> rowsort::Result<RowTable> {
        TableSorter::for_table(&prefix)
            .sort_columns(&["region", "amount"], &[true, false])?
            .config(config.clone())?
            .sort_in_memory(in_memory)
            .sort(&ExecutionMonitor::new())?
            .to_row_table()
    };
    let t0 = Instant::now();
    let external = by_strategy(false)?;
    let external_time = t0.elapsed();
    let t0 = Instant::now();
    let in_memory = by_strategy(true)?;
    let in_memory_time = t0.elapsed();
    if external != in_memory {
        return Err("external and in-memory sort disagree".into());
    }
    tracing::info!(
        rows = prefix.num_rows(),
        external_secs = external_time.as_secs_f64(),
        in_memory_secs = in_memory_time.as_secs_f64(),
        "strategies agree"
    );

    Ok(())
}
