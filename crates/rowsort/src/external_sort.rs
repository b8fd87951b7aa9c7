//! External sort: sorted runs spilled to disk, merged in levels.
//!
//! Partition phase: rows are buffered. A full buffer, or a buffer of at
//! least `max_open_chunks` rows after the memory service reported low
//! memory, is sorted and written to a disk chunk. The last buffer stays in
//! memory as the final chunk.
//!
//! Merge phase: while more than `max_open_chunks` chunks remain, groups of
//! `max_open_chunks` consecutive chunks are merged into new disk chunks
//! (one level per pass over the data). The remaining chunks go through one
//! final k-way merge, either written to an output chunk or handed out as a
//! lazy iterator.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use rowsort_config::SortConfig;
use rowsort_query::comparator::RowComparator;
use rowsort_query::kway_merge::KWayMerge;
use rowsort_query::progress::ExecutionMonitor;
use rowsort_query::sort::sort_buffer;
use rowsort_storage::chunk::Chunk;
use rowsort_storage::chunk_store::ChunkStore;
use rowsort_types::error::Result;
use rowsort_types::row::Row;

use crate::sorter::{RowSource, SortJob};

/// Lazily created spill directory of one sort.
pub(crate) struct Spill {
    parent: Option<PathBuf>,
    block_rows: usize,
    store: Option<ChunkStore>,
}

impl Spill {
    pub(crate) fn new(config: &SortConfig) -> Self {
        Spill {
            parent: config.spill_dir.clone(),
            block_rows: config.block_rows,
            store: None,
        }
    }

    /// The chunk store, created on first use.
    pub(crate) fn store(&mut self) -> Result<&ChunkStore> {
        let store = match self.store.take() {
            Some(store) => store,
            None => match &self.parent {
                Some(parent) => ChunkStore::in_dir(parent, self.block_rows)?,
                None => ChunkStore::new(self.block_rows)?,
            },
        };
        Ok(&*self.store.insert(store))
    }

    pub(crate) fn chunks_written(&self) -> u64 {
        self.store.as_ref().map_or(0, ChunkStore::chunks_created)
    }

    pub(crate) fn into_store(self) -> Option<ChunkStore> {
        self.store
    }
}

/// Row counter driving the polling points of a phase: every
/// `interval`-th row checks for cancellation and reports progress.
pub(crate) struct Ticker<'m> {
    exec: &'m ExecutionMonitor,
    total: Option<u64>,
    interval: u64,
    count: u64,
}

impl<'m> Ticker<'m> {
    pub(crate) fn new(exec: &'m ExecutionMonitor, total: Option<u64>, interval: usize) -> Self {
        Ticker {
            exec,
            total,
            interval: interval.max(1) as u64,
            count: 0,
        }
    }

    /// Count one row. Returns `true` at polling points.
    pub(crate) fn tick(&mut self, label: &str) -> Result<bool> {
        self.count += 1;
        if self.count % self.interval != 0 {
            return Ok(false);
        }
        self.exec.check_canceled()?;
        match self.total {
            Some(total) if total > 0 => self.exec.set_progress(self.count as f64 / total as f64),
            _ => self.exec.set_message(format!("{}, {} rows", label, self.count)),
        }
        Ok(true)
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl SortJob {
    /// Read the whole input into sorted chunks.
    pub(crate) fn create_initial_chunks(
        &mut self,
        rows: RowSource<'_>,
        exec: &ExecutionMonitor,
    ) -> Result<MergePhase> {
        exec.check_canceled()?;
        let mut ticker = Ticker::new(exec, self.row_count, self.config.check_interval);
        let mut buffer: Vec<Row> = Vec::new();
        let mut chunks = VecDeque::new();
        // A low reading taken while choosing the strategy applies to the
        // first run; the service will not repeat it before a collection.
        let mut low_memory = std::mem::take(&mut self.low_memory);
        let mut chunk_start = 0;

        for row in rows {
            let row = row?;
            self.spec.validate_row(&row)?;
            buffer.push(row);
            if ticker.tick("Reading table")? {
                low_memory |= self.memory.is_memory_low();
            }

            let full = buffer.len() >= self.config.max_rows_per_chunk;
            let pressed = low_memory && buffer.len() >= self.config.max_open_chunks;
            if full || pressed {
                exec.set_message("Sorting in-memory buffer");
                sort_buffer(&mut buffer, &self.comparator);
                let chunk = self.spill.store()?.write_chunk(&mut buffer)?;
                tracing::debug!(
                    start_row = chunk_start,
                    end_row = ticker.count(),
                    low_memory = pressed && !full,
                    memory = %self.memory.usage_summary(),
                    "wrote chunk"
                );
                chunks.push_back(chunk);
                chunk_start = ticker.count();
                low_memory = false;
            }
        }

        if !buffer.is_empty() {
            sort_buffer(&mut buffer, &self.comparator);
            chunks.push_back(Chunk::Memory(buffer));
        }
        exec.set_progress(1.0);

        Ok(MergePhase {
            chunks,
            num_rows: ticker.count(),
            max_open_chunks: self.config.max_open_chunks,
            check_interval: self.config.check_interval,
            comparator: Arc::clone(&self.comparator),
        })
    }

    /// Final k-way merge of `chunks` into a single output chunk. A single
    /// chunk is taken over as is.
    pub(crate) fn write_output(
        &mut self,
        mut chunks: Vec<Chunk>,
        num_rows: u64,
        exec: &ExecutionMonitor,
    ) -> Result<Chunk> {
        if chunks.len() <= 1 {
            exec.set_progress(1.0);
            return Ok(chunks.pop().unwrap_or_else(|| Chunk::Memory(Vec::new())));
        }
        exec.set_message("Writing sorted table");
        let rows = chunks
            .into_iter()
            .map(Chunk::into_rows)
            .collect::<Result<Vec<_>>>()?;
        let merge = KWayMerge::new(rows, Arc::clone(&self.comparator))?;

        let mut writer = self.spill.store()?.create_writer()?;
        let mut ticker = Ticker::new(exec, Some(num_rows), self.config.check_interval);
        for row in merge {
            writer.add_row(row?)?;
            ticker.tick("Writing sorted table")?;
        }
        let output = writer.close()?;
        exec.set_progress(1.0);
        Ok(output)
    }
}

/// Chunks produced by the partition phase, waiting to be merged.
pub(crate) struct MergePhase {
    chunks: VecDeque<Chunk>,
    num_rows: u64,
    max_open_chunks: usize,
    check_interval: usize,
    comparator: Arc<RowComparator>,
}

impl MergePhase {
    pub(crate) fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub(crate) fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Number of full passes over the data the merge phase performs before
    /// the final merge. With `merge_completely` the merge continues until a
    /// single chunk is left.
    pub(crate) fn compute_num_levels(&self, merge_completely: bool) -> usize {
        let mut levels = 0;
        let mut num_chunks = self.chunks.len();
        while num_chunks > 1 && (merge_completely || num_chunks > self.max_open_chunks) {
            num_chunks = num_chunks.div_ceil(self.max_open_chunks);
            levels += 1;
        }
        levels
    }

    /// Merge level by level until at most `max_open_chunks` chunks (one
    /// chunk with `merge_completely`) remain, and return them in order.
    pub(crate) fn merge_levels(
        mut self,
        spill: &mut Spill,
        exec: &ExecutionMonitor,
        merge_completely: bool,
    ) -> Result<Vec<Chunk>> {
        let num_levels = self.compute_num_levels(merge_completely);
        let mut level = 0;
        loop {
            let num_chunks = self.chunks.len();
            if num_chunks <= 1 || (!merge_completely && num_chunks <= self.max_open_chunks) {
                exec.set_progress(1.0);
                return Ok(self.chunks.into());
            }
            let sub = exec.create_sub_progress(1.0 / num_levels.max(1) as f64);
            self.merge_level(spill, &sub, level, num_levels)?;
            sub.set_progress(1.0);
            level += 1;
        }
    }

    fn merge_level(
        &mut self,
        spill: &mut Spill,
        exec: &ExecutionMonitor,
        level: usize,
        num_levels: usize,
    ) -> Result<()> {
        let label = format!("Merging level {}/{}", level + 1, num_levels);
        exec.set_message(label.clone());
        let store = spill.store()?;
        let mut ticker = Ticker::new(exec, Some(self.num_rows), self.check_interval);
        let mut merged = VecDeque::new();

        while self.chunks.len() > 1 {
            let k = self.max_open_chunks.min(self.chunks.len());
            let group = self
                .chunks
                .drain(..k)
                .map(Chunk::into_rows)
                .collect::<Result<Vec<_>>>()?;
            let mut writer = store.create_writer()?;
            for row in KWayMerge::new(group, Arc::clone(&self.comparator))? {
                writer.add_row(row?)?;
                ticker.tick(&label)?;
            }
            merged.push_back(writer.close()?);
        }

        let num_merged = merged.len();
        // A single leftover chunk moves on to the next level unchanged.
        merged.append(&mut self.chunks);
        tracing::debug!(
            level = level + 1,
            levels = num_levels,
            merged = num_merged,
            chunks = merged.len(),
            "merged chunk level"
        );
        self.chunks = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::{DataCell, DataType};
    use rowsort_types::table_spec::TableSpec;

    fn phase(num_chunks: usize, max_open_chunks: usize) -> MergePhase {
        let spec = TableSpec::from_pairs(&[("v", DataType::Integer)]).unwrap();
        let comparator = RowComparator::for_columns(&spec, &["v"], &[true], false).unwrap();
        MergePhase {
            chunks: (0..num_chunks)
                .map(|i| Chunk::Memory(vec![Row::new(format!("r{}", i), vec![DataCell::Integer(i as i64)])]))
                .collect(),
            num_rows: num_chunks as u64,
            max_open_chunks,
            check_interval: 1,
            comparator: Arc::new(comparator),
        }
    }

    #[test]
    fn test_compute_num_levels() {
        assert_eq!(phase(0, 40).compute_num_levels(false), 0);
        assert_eq!(phase(1, 40).compute_num_levels(true), 0);
        assert_eq!(phase(40, 40).compute_num_levels(false), 0);
        assert_eq!(phase(40, 40).compute_num_levels(true), 1);
        assert_eq!(phase(41, 40).compute_num_levels(false), 1);
        assert_eq!(phase(1601, 40).compute_num_levels(false), 2);
        assert_eq!(phase(10, 3).compute_num_levels(false), 2);
        assert_eq!(phase(10, 3).compute_num_levels(true), 3);
    }

    #[test]
    fn test_merge_levels_until_open_limit() {
        let mut spill = Spill::new(&SortConfig::default());
        let exec = ExecutionMonitor::new();
        let remaining = phase(10, 3).merge_levels(&mut spill, &exec, false).unwrap();
        // 10 -> 4 (3 merged + 1 carried over) -> 2 (1 merged + 1 carried over).
        assert_eq!(remaining.len(), 2);
        assert_eq!(spill.chunks_written(), 4);
        assert!((exec.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_completely_preserves_order() {
        let mut spill = Spill::new(&SortConfig::default());
        let exec = ExecutionMonitor::new();
        let remaining = phase(7, 3).merge_levels(&mut spill, &exec, true).unwrap();
        assert_eq!(remaining.len(), 1);
        let keys: Vec<String> = remaining[0]
            .iter()
            .unwrap()
            .map(|r| r.unwrap().key().to_string())
            .collect();
        let expected: Vec<String> = (0..7).map(|i| format!("r{}", i)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_ticker_polls_at_interval() {
        let exec = ExecutionMonitor::new();
        let mut ticker = Ticker::new(&exec, Some(10), 4);
        let polls: Vec<bool> = (0..8).map(|_| ticker.tick("t").unwrap()).collect();
        assert_eq!(polls, vec![false, false, false, true, false, false, false, true]);
        assert!((exec.progress() - 0.8).abs() < 1e-9);

        exec.cancel_handle().cancel();
        assert!(ticker.tick("t").is_ok());
        assert!(ticker.tick("t").is_ok());
        assert!(ticker.tick("t").is_ok());
        assert!(ticker.tick("t").unwrap_err().is_canceled());
    }
}
