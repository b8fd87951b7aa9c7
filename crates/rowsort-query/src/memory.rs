//! Memory pressure detection.
//!
//! [`MemoryService`] answers whether memory usage is high enough that a
//! caller should spill to disk instead of buffering more rows. It reports
//! "low memory" at most once per reclaim cycle:
//!
//! - **Armed**: each poll compares used memory against the threshold. Above
//!   the threshold the service records a reclaim marker (the probe's
//!   collection count, or the used-memory reading if the probe has none),
//!   switches to cooling and reports low memory.
//! - **Cooling**: each poll compares the current marker to the recorded
//!   one. While it is unchanged the service reports "not low" without
//!   looking at the threshold. Once it changes the service re-arms and
//!   evaluates the threshold immediately.
//!
//! Platform access goes through the [`MemoryProbe`] trait so tests can
//! drive the state machine deterministically.

use rowsort_config::{heap_size_from_args, SortConfig};

/// Max memory used when neither the probe nor the configuration provide one.
pub const CONSERVATIVE_MAX_MEMORY: u64 = 64 * 1024 * 1024;

/// Readings above this are treated as "no limit" rather than a real figure.
const UNRELIABLE_MAX_MEMORY: u64 = 1 << 60;

/// Source of memory statistics.
pub trait MemoryProbe: Send {
    /// Upper bound of memory available to the process, if known.
    fn max_memory(&self) -> Option<u64>;

    /// Usage of the long-lived memory pool, if the platform exposes one.
    fn long_lived_used(&self) -> Option<u64>;

    /// Process-wide used memory.
    fn used_memory(&self) -> u64;

    /// Number of reclaim cycles so far, if the platform counts them.
    fn collection_count(&self) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Armed,
    Cooling { marker: u64 },
}

pub struct MemoryService {
    probe: Box<dyn MemoryProbe>,
    threshold: u64,
    state: MemoryState,
}

impl MemoryService {
    /// Create a service whose threshold is `fraction` of the max memory.
    ///
    /// The max memory comes from the probe when it reports a reliable
    /// figure, then from `fallback_max`, and finally from
    /// [`CONSERVATIVE_MAX_MEMORY`] with a warning.
    pub fn new(probe: Box<dyn MemoryProbe>, fraction: f64, fallback_max: Option<u64>) -> Self {
        let max = match probe.max_memory() {
            Some(max) if max > 0 && max < UNRELIABLE_MAX_MEMORY => max,
            _ => match fallback_max {
                Some(max) => max,
                None => {
                    tracing::warn!(
                        max_bytes = CONSERVATIVE_MAX_MEMORY,
                        "no reliable max memory figure available, using conservative default"
                    );
                    CONSERVATIVE_MAX_MEMORY
                }
            },
        };
        let threshold = (max as f64 * fraction.clamp(0.0, 1.0)) as u64;
        tracing::debug!(max_bytes = max, threshold_bytes = threshold, "memory service created");
        MemoryService {
            probe,
            threshold,
            state: MemoryState::Armed,
        }
    }

    /// Service over the current process, configured from `config`. When
    /// `config.max_memory` is unset, a `--max-memory` process argument is
    /// used as the fallback max.
    pub fn from_config(config: &SortConfig) -> Self {
        let fallback = config
            .max_memory
            .or_else(|| heap_size_from_args(std::env::args()));
        MemoryService::new(Box::new(ProcessMemoryProbe), config.memory_threshold, fallback)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn state(&self) -> MemoryState {
        self.state
    }

    /// Current used memory: the long-lived pool if available, else the
    /// process-wide figure.
    pub fn used_memory(&self) -> u64 {
        self.probe
            .long_lived_used()
            .unwrap_or_else(|| self.probe.used_memory())
    }

    fn reclaim_marker(&self) -> u64 {
        self.probe
            .collection_count()
            .unwrap_or_else(|| self.used_memory())
    }

    /// Poll the service. Returns `true` at most once per reclaim cycle.
    pub fn is_memory_low(&mut self) -> bool {
        if let MemoryState::Cooling { marker } = self.state {
            if self.reclaim_marker() == marker {
                return false;
            }
            self.state = MemoryState::Armed;
        }

        let used = self.used_memory();
        if used > self.threshold {
            let marker = self.reclaim_marker();
            self.state = MemoryState::Cooling { marker };
            tracing::debug!(used_bytes = used, threshold_bytes = self.threshold, "memory is low");
            true
        } else {
            false
        }
    }

    /// Human readable usage summary for log messages.
    pub fn usage_summary(&self) -> String {
        const MB: f64 = 1024.0 * 1024.0;
        format!(
            "used: {:.1}MB, threshold: {:.1}MB",
            self.used_memory() as f64 / MB,
            self.threshold as f64 / MB
        )
    }
}

/// Probe reading the statistics of the running process.
///
/// On Linux: resident set size from `/proc/self/smaps_rollup` (`statm` on
/// older kernels), max memory from the cgroup limit or `MemTotal`.
/// Elsewhere it reports no max memory and zero usage. There is no
/// long-lived pool and no collection count, so the service falls back to
/// process-wide usage for both.
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn max_memory(&self) -> Option<u64> {
        cgroup_limit().or_else(meminfo_total)
    }

    fn long_lived_used(&self) -> Option<u64> {
        None
    }

    fn used_memory(&self) -> u64 {
        resident_bytes().unwrap_or(0)
    }

    fn collection_count(&self) -> Option<u64> {
        None
    }
}

/// Page size assumed when falling back to `statm`, which counts pages.
const STATM_PAGE_SIZE: u64 = 4096;

/// Resident set size. `smaps_rollup` reports it in kB whatever the page
/// size; `statm` is only consulted on kernels without it (before 4.14).
fn resident_bytes() -> Option<u64> {
    if let Some(rss) = std::fs::read_to_string("/proc/self/smaps_rollup")
        .ok()
        .and_then(|rollup| kb_field_from(&rollup, "Rss:"))
    {
        return Some(rss);
    }
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * STATM_PAGE_SIZE)
}

fn cgroup_limit() -> Option<u64> {
    ["/sys/fs/cgroup/memory.max", "/sys/fs/cgroup/memory/memory.limit_in_bytes"]
        .iter()
        .find_map(|path| {
            let raw = std::fs::read_to_string(path).ok()?;
            // cgroup v2 writes "max" for no limit.
            raw.trim().parse::<u64>().ok()
        })
}

fn meminfo_total() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo_total_from(&meminfo)
}

fn meminfo_total_from(meminfo: &str) -> Option<u64> {
    kb_field_from(meminfo, "MemTotal:")
}

/// Value in bytes of a `Name:   1234 kB` line of a procfs file.
fn kb_field_from(contents: &str, name: &str) -> Option<u64> {
    let line = contents.lines().find(|l| l.starts_with(name))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
