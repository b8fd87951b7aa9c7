//! Sort configuration.
//!
//! A [`SortConfig`] is built explicitly and handed to the sorter; there is
//! no process-wide instance. Fields can be overridden from environment
//! variables via [`SortConfig::from_env`]:
//!
//! - `ROWSORT_MAX_ROWS_PER_CHUNK`: rows per initial run. Default: 20,000.
//! - `ROWSORT_MAX_OPEN_CHUNKS`: chunks merged at once. Default: 40.
//! - `ROWSORT_MEMORY_THRESHOLD`: fraction of max memory above which memory
//!   counts as low. Default: 0.8.
//! - `ROWSORT_MAX_MEMORY`: max memory figure used when the platform cannot
//!   report one, e.g. `2G`. Default: unset.
//! - `ROWSORT_CHECK_INTERVAL`: rows between cancellation checks and memory
//!   polls. Default: 1000.
//! - `ROWSORT_BLOCK_ROWS`: rows per compressed block in chunk files.
//!   Default: 4096.
//! - `ROWSORT_SPILL_DIR`: parent directory for chunk files. Default: the
//!   system temp dir.
//! - `ROWSORT_DISABLE_MIN_MEMORY_CHECK`: `true`/`false`. Default: `true`.

use std::path::PathBuf;

use rowsort_types::error::{Result, SortError};

pub const DEFAULT_MAX_ROWS_PER_CHUNK: usize = 20_000;
pub const DEFAULT_MAX_OPEN_CHUNKS: usize = 40;
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_CHECK_INTERVAL: usize = 1000;
pub const DEFAULT_BLOCK_ROWS: usize = 4096;

/// Settings of one sort operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SortConfig {
    /// Maximum number of rows in an initial run of the external sort.
    pub max_rows_per_chunk: usize,

    /// Maximum number of chunks merged at once. More chunks than this are
    /// merged in several levels.
    pub max_open_chunks: usize,

    /// Fraction of max memory above which the memory service reports low
    /// memory.
    pub memory_threshold: f64,

    /// Max memory in bytes, used when the memory probe cannot report one.
    pub max_memory: Option<u64>,

    /// Rows between two cancellation checks / memory polls.
    pub check_interval: usize,

    /// Rows per block in a chunk file.
    pub block_rows: usize,

    /// Parent directory for the spill directory.
    pub spill_dir: Option<PathBuf>,

    /// When `false`, an in-memory sort started under low memory switches
    /// to the external strategy.
    pub disable_min_memory_check: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            max_rows_per_chunk: DEFAULT_MAX_ROWS_PER_CHUNK,
            max_open_chunks: DEFAULT_MAX_OPEN_CHUNKS,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            max_memory: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            block_rows: DEFAULT_BLOCK_ROWS,
            spill_dir: None,
            disable_min_memory_check: true,
        }
    }
}

impl SortConfig {
    /// Defaults overridden by `ROWSORT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `ROWSORT_*`
    /// variable names. Values that do not parse are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = SortConfig::default();

        if let Some(n) = lookup_parsed(&lookup, "ROWSORT_MAX_ROWS_PER_CHUNK", |s| s.parse().ok()) {
            config.max_rows_per_chunk = n;
        }
        if let Some(n) = lookup_parsed(&lookup, "ROWSORT_MAX_OPEN_CHUNKS", |s| s.parse().ok()) {
            config.max_open_chunks = n;
        }
        if let Some(t) = lookup_parsed(&lookup, "ROWSORT_MEMORY_THRESHOLD", |s| s.parse().ok()) {
            config.memory_threshold = t;
        }
        if let Some(n) = lookup_parsed(&lookup, "ROWSORT_MAX_MEMORY", parse_byte_size) {
            config.max_memory = Some(n);
        }
        if let Some(n) = lookup_parsed(&lookup, "ROWSORT_CHECK_INTERVAL", |s| s.parse().ok()) {
            config.check_interval = n;
        }
        if let Some(n) = lookup_parsed(&lookup, "ROWSORT_BLOCK_ROWS", |s| s.parse().ok()) {
            config.block_rows = n;
        }
        if let Some(dir) = lookup("ROWSORT_SPILL_DIR") {
            if !dir.trim().is_empty() {
                config.spill_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        if let Some(b) = lookup_parsed(&lookup, "ROWSORT_DISABLE_MIN_MEMORY_CHECK", parse_bool) {
            config.disable_min_memory_check = b;
        }

        config
    }

    /// Reject settings the sorter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_chunk == 0 {
            return Err(SortError::Config(
                "max_rows_per_chunk must be positive".to_string(),
            ));
        }
        if self.max_open_chunks <= 2 {
            return Err(SortError::Config(format!(
                "Invalid open chunk count: {}",
                self.max_open_chunks
            )));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(SortError::Config(format!(
                "memory_threshold must be in (0, 1], got {}",
                self.memory_threshold
            )));
        }
        if self.check_interval == 0 {
            return Err(SortError::Config("check_interval must be positive".to_string()));
        }
        if self.block_rows == 0 {
            return Err(SortError::Config("block_rows must be positive".to_string()));
        }
        Ok(())
    }
}

fn lookup_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(name)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
    }
    parsed
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a byte size string. Supports plain integers and suffixes:
/// `K`/`KB`, `M`/`MB`, `G`/`GB` (case-insensitive).
pub fn parse_byte_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let (num_str, multiplier) = [("GB", 1u64 << 30), ("G", 1 << 30), ("MB", 1 << 20), ("M", 1 << 20), ("KB", 1 << 10), ("K", 1 << 10)]
        .iter()
        .find_map(|&(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim().to_string(), mult)))
        .unwrap_or((upper.clone(), 1));
    num_str.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Find a `--max-memory` argument (`--max-memory=2G` or `--max-memory 2G`)
/// and parse its byte size.
pub fn heap_size_from_args<I, S>(args: I) -> Option<u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if let Some(value) = arg.strip_prefix("--max-memory=") {
            return parse_byte_size(value);
        }
        if arg == "--max-memory" {
            return args.next().and_then(|v| parse_byte_size(v.as_ref()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1024"), Some(1024));
        assert_eq!(parse_byte_size("10K"), Some(10 * 1024));
        assert_eq!(parse_byte_size("10kb"), Some(10 * 1024));
        assert_eq!(parse_byte_size("5M"), Some(5 * 1024 * 1024));
        assert_eq!(parse_byte_size("5MB"), Some(5 * 1024 * 1024));
        assert_eq!(parse_byte_size("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_byte_size("2GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_byte_size(" 100 "), Some(100));
        assert_eq!(parse_byte_size("abc"), None);
        assert_eq!(parse_byte_size(""), None);
    }

    #[test]
    fn test_heap_size_from_args() {
        assert_eq!(heap_size_from_args(["prog", "--max-memory=512M"]), Some(512 << 20));
        assert_eq!(heap_size_from_args(["prog", "--max-memory", "1G"]), Some(1 << 30));
        assert_eq!(heap_size_from_args(["prog", "--max-memory"]), None);
        assert_eq!(heap_size_from_args(["prog", "-v"]), None);
    }

    #[test]
    fn test_defaults() {
        let config = SortConfig::default();
        assert_eq!(config.max_rows_per_chunk, 20_000);
        assert_eq!(config.max_open_chunks, 40);
        assert!(config.disable_min_memory_check);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ROWSORT_MAX_ROWS_PER_CHUNK", "500"),
            ("ROWSORT_MAX_MEMORY", "64MB"),
            ("ROWSORT_MEMORY_THRESHOLD", "not-a-number"),
            ("ROWSORT_SPILL_DIR", "/var/tmp"),
            ("ROWSORT_DISABLE_MIN_MEMORY_CHECK", "false"),
        ]
        .into_iter()
        .collect();
        let config = SortConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.max_rows_per_chunk, 500);
        assert_eq!(config.max_memory, Some(64 << 20));
        assert_eq!(config.memory_threshold, DEFAULT_MEMORY_THRESHOLD);
        assert_eq!(config.spill_dir, Some(PathBuf::from("/var/tmp")));
        assert!(!config.disable_min_memory_check);
    }

    #[test]
    fn test_validate() {
        let bad = SortConfig {
            max_open_chunks: 2,
            ..SortConfig::default()
        };
        assert!(matches!(bad.validate(), Err(SortError::Config(_))));

        let bad = SortConfig {
            memory_threshold: 1.5,
            ..SortConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = SortConfig {
            max_rows_per_chunk: 0,
            ..SortConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
