//! Table sorter: builder, strategy selection and sorted results.
//!
//! A [`TableSorter`] reads a single-pass row source exactly once. It sorts
//! either fully in memory or with the external merge strategy. Both
//! strategies sort stably, so they produce the same row order for the
//! same input.

use std::sync::Arc;

use rowsort_config::SortConfig;
use rowsort_query::comparator::{RowComparator, SortTarget};
use rowsort_query::kway_merge::KWayMerge;
use rowsort_query::memory::MemoryService;
use rowsort_query::progress::ExecutionMonitor;
use rowsort_query::sort::sort_buffer;
use rowsort_storage::chunk::{Chunk, ChunkIter};
use rowsort_storage::chunk_store::{ChunkBuilder, ChunkStore};
use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;
use rowsort_types::table_spec::TableSpec;

use crate::external_sort::{Spill, Ticker};
use crate::table::RowTable;

/// Single-pass input of a sort.
pub type RowSource<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    InMemory,
    External,
}

/// What a finished sort did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortStats {
    pub strategy: SortStrategy,
    pub rows: u64,
    /// Chunk files written, including merge levels and the output chunk.
    pub chunks_written: u64,
    /// Merge passes before the final merge.
    pub merge_levels: usize,
}

/// Everything a running sort needs besides its input.
pub(crate) struct SortJob {
    pub(crate) spec: TableSpec,
    pub(crate) comparator: Arc<RowComparator>,
    pub(crate) config: SortConfig,
    pub(crate) row_count: Option<u64>,
    pub(crate) memory: MemoryService,
    /// Low memory already reported before the first row was read.
    pub(crate) low_memory: bool,
    pub(crate) spill: Spill,
}

pub struct TableSorter<'a> {
    spec: TableSpec,
    rows: RowSource<'a>,
    row_count: Option<u64>,
    comparator: Option<RowComparator>,
    sort_in_memory: bool,
    config: SortConfig,
    memory: Option<MemoryService>,
}

impl<'a> TableSorter<'a> {
    /// Sorter over `rows`, which must conform to `spec`. `row_count` is only
    /// used for progress reporting.
    pub fn new(
        spec: TableSpec,
        rows: impl Iterator<Item = Result<Row>> + 'a,
        row_count: Option<u64>,
    ) -> Self {
        TableSorter {
            spec,
            rows: Box::new(rows),
            row_count,
            comparator: None,
            sort_in_memory: false,
            config: SortConfig::default(),
            memory: None,
        }
    }

    pub fn for_table(table: &'a RowTable) -> Self {
        Self::new(table.spec().clone(), table.iter_rows(), Some(table.num_rows()))
    }

    /// Sort by the named columns, `ascending[i]` giving the direction of
    /// `names[i]`. Fails without reading any row if the selection is invalid.
    pub fn sort_columns<S: AsRef<str>>(self, names: &[S], ascending: &[bool]) -> Result<Self> {
        self.sort_columns_with_missings(names, ascending, false)
    }

    /// Like [`Self::sort_columns`]; with `missings_last` missing cells end
    /// up last in either direction.
    pub fn sort_columns_with_missings<S: AsRef<str>>(
        mut self,
        names: &[S],
        ascending: &[bool],
        missings_last: bool,
    ) -> Result<Self> {
        self.comparator = Some(RowComparator::for_columns(
            &self.spec,
            names,
            ascending,
            missings_last,
        )?);
        Ok(self)
    }

    /// Sort with a prebuilt comparator. Its columns must exist in the table spec.
    pub fn row_comparator(mut self, comparator: RowComparator) -> Result<Self> {
        let num_columns = self.spec.num_columns();
        for column in comparator.columns() {
            if let SortTarget::Column(i) = column.target {
                if i >= num_columns {
                    return Err(SortError::Config(format!(
                        "Sort column index {} out of range, table has {} columns",
                        i, num_columns
                    )));
                }
            }
        }
        self.comparator = Some(comparator);
        Ok(self)
    }

    pub fn sort_in_memory(mut self, sort_in_memory: bool) -> Self {
        self.sort_in_memory = sort_in_memory;
        self
    }

    pub fn config(mut self, config: SortConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Use `memory` instead of a service over the current process.
    pub fn memory_service(mut self, memory: MemoryService) -> Self {
        self.memory = Some(memory);
        self
    }

    fn prepare(self) -> Result<(SortJob, RowSource<'a>, SortStrategy)> {
        let comparator = self.comparator.ok_or_else(|| {
            SortError::Config("No sort columns selected".to_string())
        })?;
        let mut memory = match self.memory {
            Some(memory) => memory,
            None => MemoryService::from_config(&self.config),
        };

        let low_memory =
            self.sort_in_memory && !self.config.disable_min_memory_check && memory.is_memory_low();
        let strategy = if !self.sort_in_memory {
            SortStrategy::External
        } else if low_memory {
            tracing::info!(
                memory = %memory.usage_summary(),
                "memory is low, sorting on disk instead of in memory"
            );
            SortStrategy::External
        } else {
            SortStrategy::InMemory
        };
        tracing::debug!(?strategy, row_count = ?self.row_count, "starting sort");

        let job = SortJob {
            spill: Spill::new(&self.config),
            spec: self.spec,
            comparator: Arc::new(comparator),
            config: self.config,
            row_count: self.row_count,
            memory,
            low_memory,
        };
        Ok((job, self.rows, strategy))
    }

    /// Sort the input into a [`SortedTable`].
    pub fn sort(self, exec: &ExecutionMonitor) -> Result<SortedTable> {
        let (mut job, rows, strategy) = self.prepare()?;
        let (chunk, merge_levels) = match strategy {
            SortStrategy::InMemory => (job.sort_all_in_memory(rows, exec)?, 0),
            SortStrategy::External => {
                exec.set_message("Reading data");
                let phase = job.create_initial_chunks(rows, &exec.create_sub_progress(0.5))?;
                let num_rows = phase.num_rows();
                let levels = phase.compute_num_levels(false);

                exec.set_message("Merging temporary tables");
                let share = 0.5 / (levels + 1) as f64;
                let merge_exec = exec.create_sub_progress(share * levels as f64);
                let chunks = phase.merge_levels(&mut job.spill, &merge_exec, false)?;
                let chunk = job.write_output(chunks, num_rows, &exec.create_sub_progress(share))?;
                (chunk, levels)
            }
        };
        exec.set_progress(1.0);

        let stats = SortStats {
            strategy,
            rows: chunk.len(),
            chunks_written: job.spill.chunks_written(),
            merge_levels,
        };
        tracing::debug!(?stats, "sort finished");
        Ok(SortedTable {
            chunk,
            spill: job.spill.into_store(),
            spec: job.spec,
            stats,
        })
    }

    /// Sort the input but defer the final merge: the returned iterator
    /// merges the remaining chunks while it is consumed.
    pub fn sorted_rows(self, exec: &ExecutionMonitor) -> Result<SortedRows> {
        let (mut job, rows, strategy) = self.prepare()?;
        let (merge, rows_total, merge_levels) = match strategy {
            SortStrategy::InMemory => {
                let chunk = job.sort_all_in_memory(rows, exec)?;
                let rows_total = chunk.len();
                let merge = KWayMerge::new(vec![chunk.into_rows()?], Arc::clone(&job.comparator))?;
                (merge, rows_total, 0)
            }
            SortStrategy::External => {
                exec.set_message("Reading data");
                let phase = job.create_initial_chunks(rows, &exec.create_sub_progress(0.5))?;
                let rows_total = phase.num_rows();
                let levels = phase.compute_num_levels(false);
                tracing::debug!(chunks = phase.num_chunks(), levels, "merging into iterator");

                exec.set_message("Merging temporary tables");
                let merge_exec = exec.create_sub_progress(0.5);
                let chunks = phase.merge_levels(&mut job.spill, &merge_exec, false)?;
                let rows = chunks
                    .into_iter()
                    .map(Chunk::into_rows)
                    .collect::<Result<Vec<_>>>()?;
                (KWayMerge::new(rows, Arc::clone(&job.comparator))?, rows_total, levels)
            }
        };
        exec.set_progress(1.0);

        let stats = SortStats {
            strategy,
            rows: rows_total,
            chunks_written: job.spill.chunks_written(),
            merge_levels,
        };
        Ok(SortedRows {
            merge,
            spill: job.spill.into_store(),
            spec: job.spec,
            stats,
        })
    }
}

impl SortJob {
    /// Read everything (first half of the progress), sort, and copy into
    /// the output chunk (second half). Fewer than two rows are passed
    /// through unsorted.
    fn sort_all_in_memory(&mut self, rows: RowSource<'_>, exec: &ExecutionMonitor) -> Result<Chunk> {
        exec.check_canceled()?;
        exec.set_message("Reading data");
        let read_exec = exec.create_sub_progress(0.5);
        let mut ticker = Ticker::new(&read_exec, self.row_count, self.config.check_interval);
        let mut buffer = Vec::new();
        for row in rows {
            let row = row?;
            self.spec.validate_row(&row)?;
            buffer.push(row);
            ticker.tick("Reading data")?;
        }
        read_exec.set_progress(1.0);
        if buffer.len() < 2 {
            return Ok(Chunk::Memory(buffer));
        }

        exec.set_message("Sorting");
        exec.check_canceled()?;
        sort_buffer(&mut buffer, &self.comparator);

        exec.set_message("Creating sorted table");
        let write_exec = exec.create_sub_progress(0.5);
        let total = buffer.len() as u64;
        let mut output = ChunkBuilder::Memory(Vec::with_capacity(buffer.len()));
        let mut ticker = Ticker::new(&write_exec, Some(total), self.config.check_interval);
        for row in buffer {
            output.add_row(row)?;
            ticker.tick("Creating sorted table")?;
        }
        write_exec.set_progress(1.0);
        output.close()
    }
}

/// Result of [`TableSorter::sort`]. Can be read any number of times; chunk
/// files backing it are removed when it is dropped.
#[derive(Debug)]
pub struct SortedTable {
    // Dropped before the spill directory.
    chunk: Chunk,
    spill: Option<ChunkStore>,
    spec: TableSpec,
    stats: SortStats,
}

impl SortedTable {
    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn row_count(&self) -> u64 {
        self.chunk.len()
    }

    pub fn iter(&self) -> Result<ChunkIter<'_>> {
        self.chunk.iter()
    }

    pub fn is_on_disk(&self) -> bool {
        self.chunk.is_on_disk()
    }

    pub fn stats(&self) -> &SortStats {
        &self.stats
    }

    /// Read all rows back into memory.
    pub fn to_row_table(&self) -> Result<RowTable> {
        let rows = self.iter()?.collect::<Result<Vec<_>>>()?;
        RowTable::new(self.spec.clone(), rows)
    }
}

/// Result of [`TableSorter::sorted_rows`]: a single-pass iterator over
/// the sorted rows.
pub struct SortedRows {
    merge: KWayMerge,
    spill: Option<ChunkStore>,
    spec: TableSpec,
    stats: SortStats,
}

impl SortedRows {
    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn row_count(&self) -> u64 {
        self.stats.rows
    }

    pub fn stats(&self) -> &SortStats {
        &self.stats
    }

    /// Spill directory in use, if any chunk was written.
    pub fn spill_dir(&self) -> Option<&std::path::Path> {
        self.spill.as_ref().map(ChunkStore::path)
    }
}

impl Iterator for SortedRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::{DataCell, DataType};

    fn table(values: &[i64]) -> RowTable {
        let spec = TableSpec::from_pairs(&[("v", DataType::Integer)]).unwrap();
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Row::new(format!("r{}", i + 1), vec![DataCell::Integer(v)]))
            .collect();
        RowTable::new(spec, rows).unwrap()
    }

    fn keys(table: &SortedTable) -> Vec<String> {
        table
            .iter()
            .unwrap()
            .map(|r| r.unwrap().key().to_string())
            .collect()
    }

    fn small_runs(rows_per_chunk: usize) -> SortConfig {
        SortConfig {
            max_rows_per_chunk: rows_per_chunk,
            ..SortConfig::default()
        }
    }

    #[test]
    fn test_run_size_two() {
        let input = table(&[5, 1, 3]);
        let sorted = TableSorter::for_table(&input)
            .sort_columns(&["v"], &[true])
            .unwrap()
            .config(small_runs(2))
            .unwrap()
            .sort(&ExecutionMonitor::new())
            .unwrap();
        assert_eq!(keys(&sorted), vec!["r2", "r3", "r1"]);
        assert_eq!(sorted.row_count(), 3);
        assert_eq!(sorted.stats().strategy, SortStrategy::External);
        // One spilled run plus the merged output.
        assert_eq!(sorted.stats().chunks_written, 2);
        assert!(sorted.is_on_disk());
    }

    #[test]
    fn test_in_memory() {
        let input = table(&[5, 1, 3]);
        let exec = ExecutionMonitor::new();
        let sorted = TableSorter::for_table(&input)
            .sort_columns(&["v"], &[false])
            .unwrap()
            .sort_in_memory(true)
            .sort(&exec)
            .unwrap();
        assert_eq!(keys(&sorted), vec!["r1", "r3", "r2"]);
        assert_eq!(sorted.stats().strategy, SortStrategy::InMemory);
        assert_eq!(sorted.stats().chunks_written, 0);
        assert!((exec.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sort_columns() {
        let input = table(&[1, 2]);
        let err = TableSorter::for_table(&input)
            .sort(&ExecutionMonitor::new())
            .unwrap_err();
        assert!(matches!(err, SortError::Config(_)));
    }

    #[test]
    fn test_comparator_index_checked() {
        let input = table(&[1]);
        let cmp = RowComparator::new(vec![rowsort_query::comparator::SortColumn::column(
            3,
            DataType::Integer.comparator(),
        )])
        .unwrap();
        assert!(TableSorter::for_table(&input).row_comparator(cmp).is_err());
    }

    #[test]
    fn test_sorted_rows_single_chunk() {
        let input = table(&[2, 1]);
        let rows: Vec<Row> = TableSorter::for_table(&input)
            .sort_columns(&["v"], &[true])
            .unwrap()
            .sorted_rows(&ExecutionMonitor::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows[0].key().as_str(), "r2");
        assert_eq!(rows[1].key().as_str(), "r1");
    }
}
