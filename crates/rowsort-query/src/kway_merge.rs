//! K-way merge of sorted chunks.
//!
//! Open chunk iterators sit in a fixed-size slot array. Each step scans
//! the heads of all open slots, emits the smallest, and advances that
//! slot. A slot whose iterator runs dry is marked exhausted, which drops
//! (and thereby releases) its chunk right away; exhausted slots are
//! skipped by every later scan.

use std::cmp::Ordering;
use std::sync::Arc;

use rowsort_storage::chunk::ChunkRows;
use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;

use crate::comparator::RowComparator;

enum MergeSlot {
    Open { head: Row, rows: ChunkRows },
    Exhausted,
}

impl MergeSlot {
    /// Pull the first row of `rows`; an empty chunk is exhausted at once.
    fn open(mut rows: ChunkRows) -> Result<Self> {
        match rows.next() {
            Some(head) => Ok(MergeSlot::Open { head: head?, rows }),
            None => Ok(MergeSlot::Exhausted),
        }
    }

    fn head(&self) -> Option<&Row> {
        match self {
            MergeSlot::Open { head, .. } => Some(head),
            MergeSlot::Exhausted => None,
        }
    }
}

/// Index of the smallest candidate, `None` if every candidate is absent.
///
/// Absent candidates compare greater than any row, so they are never
/// chosen while a present one remains. Ties go to the lowest index, which
/// keeps rows of earlier chunks ahead of equal rows of later chunks.
pub fn select_min<'r>(
    candidates: impl IntoIterator<Item = Option<&'r Row>>,
    comparator: &RowComparator,
) -> Option<usize> {
    let mut best: Option<(usize, &Row)> = None;
    for (i, candidate) in candidates.into_iter().enumerate() {
        let Some(row) = candidate else {
            continue;
        };
        match best {
            Some((_, b)) if comparator.compare_nullable(Some(row), Some(b)) != Ordering::Less => {}
            _ => best = Some((i, row)),
        }
    }
    best.map(|(i, _)| i)
}

/// Merges sorted chunks into one sorted row sequence.
pub struct KWayMerge {
    slots: Vec<MergeSlot>,
    comparator: Arc<RowComparator>,
    open: usize,
    /// Read error raised while advancing a slot, yielded after that slot's head.
    failed: Option<SortError>,
}

impl KWayMerge {
    pub fn new(chunks: Vec<ChunkRows>, comparator: Arc<RowComparator>) -> Result<Self> {
        let mut slots = Vec::with_capacity(chunks.len());
        for rows in chunks {
            slots.push(MergeSlot::open(rows)?);
        }
        let open = slots.iter().filter(|s| s.head().is_some()).count();
        Ok(KWayMerge {
            slots,
            comparator,
            open,
            failed: None,
        })
    }

    /// Number of slots that still hold rows.
    pub fn open_slots(&self) -> usize {
        self.open
    }

    fn pop_min(&mut self) -> Option<Result<Row>> {
        let idx = select_min(self.slots.iter().map(MergeSlot::head), &self.comparator)?;

        let slot = std::mem::replace(&mut self.slots[idx], MergeSlot::Exhausted);
        let MergeSlot::Open { head, mut rows } = slot else {
            return None;
        };
        match rows.next() {
            Some(Ok(next)) => {
                self.slots[idx] = MergeSlot::Open { head: next, rows };
            }
            Some(Err(e)) => {
                // The merged order is broken from here on: release every
                // chunk and end the merge after this error.
                self.slots.iter_mut().for_each(|slot| *slot = MergeSlot::Exhausted);
                self.open = 0;
                self.failed = Some(e);
            }
            // `rows` is dropped here: the chunk is released once, on exhaustion.
            None => self.open -= 1,
        }
        Some(Ok(head))
    }
}

impl Iterator for KWayMerge {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.failed.take() {
            return Some(Err(e));
        }
        if self.open == 0 {
            return None;
        }
        self.pop_min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_storage::chunk::Chunk;
    use rowsort_storage::chunk_store::ChunkStore;
    use rowsort_types::data_cell::{DataCell, DataType};
    use rowsort_types::table_spec::TableSpec;

    fn comparator(ascending: bool) -> Arc<RowComparator> {
        let spec = TableSpec::from_pairs(&[("v", DataType::Integer)]).unwrap();
        Arc::new(RowComparator::for_columns(&spec, &["v"], &[ascending], false).unwrap())
    }

    fn row(key: &str, v: i64) -> Row {
        Row::new(key, vec![DataCell::Integer(v)])
    }

    fn values(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|r| match r.cell(0) {
                DataCell::Integer(v) => *v,
                other => panic!("unexpected cell {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_select_min_skips_absent() {
        let cmp = comparator(true);
        let a = row("a", 5);
        let b = row("b", 3);
        assert_eq!(select_min([None, Some(&a), None, Some(&b)], &cmp), Some(3));
        assert_eq!(select_min([None, None], &cmp), None);
        assert_eq!(select_min(Vec::<Option<&Row>>::new(), &cmp), None);
        // Ties resolve to the lower index.
        let c = row("c", 3);
        assert_eq!(select_min([Some(&a), Some(&b), Some(&c)], &cmp), Some(1));
    }

    #[test]
    fn test_merge_memory_chunks() {
        let chunks = vec![
            Chunk::Memory(vec![row("a", 1), row("b", 4), row("c", 9)]),
            Chunk::Memory(vec![]),
            Chunk::Memory(vec![row("d", 2), row("e", 3)]),
            Chunk::Memory(vec![row("f", 8)]),
        ];
        let rows: Vec<ChunkRows> = chunks.into_iter().map(|c| c.into_rows().unwrap()).collect();
        let merge = KWayMerge::new(rows, comparator(true)).unwrap();
        assert_eq!(merge.open_slots(), 3);
        let out: Vec<Row> = merge.collect::<Result<_>>().unwrap();
        assert_eq!(values(&out), vec![1, 2, 3, 4, 8, 9]);
    }

    #[test]
    fn test_merge_descending() {
        let chunks = vec![
            Chunk::Memory(vec![row("a", 9), row("b", 1)]),
            Chunk::Memory(vec![row("c", 5), row("d", 4)]),
        ];
        let rows: Vec<ChunkRows> = chunks.into_iter().map(|c| c.into_rows().unwrap()).collect();
        let out: Vec<Row> = KWayMerge::new(rows, comparator(false))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(values(&out), vec![9, 5, 4, 1]);
    }

    #[test]
    fn test_exhausted_disk_chunk_released_before_merge_ends() {
        let store = ChunkStore::new(2).unwrap();
        let mut short = vec![row("a", 1)];
        let mut long = vec![row("b", 2), row("c", 3), row("d", 4)];
        let short = store.write_chunk(&mut short).unwrap();
        let long = store.write_chunk(&mut long).unwrap();

        let count_files = || std::fs::read_dir(store.path()).unwrap().count();
        assert_eq!(count_files(), 2);

        let rows = vec![short.into_rows().unwrap(), long.into_rows().unwrap()];
        let mut merge = KWayMerge::new(rows, comparator(true)).unwrap();
        assert_eq!(values(&[merge.next().unwrap().unwrap()]), vec![1]);
        assert_eq!(count_files(), 1);
        assert_eq!(merge.open_slots(), 1);

        let rest: Vec<Row> = merge.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(values(&rest), vec![2, 3, 4]);
        assert_eq!(count_files(), 0);
        assert!(merge.next().is_none());
    }

    #[test]
    fn test_equal_rows_keep_chunk_order() {
        let chunks = vec![
            Chunk::Memory(vec![row("first", 1)]),
            Chunk::Memory(vec![row("second", 1)]),
        ];
        let rows: Vec<ChunkRows> = chunks.into_iter().map(|c| c.into_rows().unwrap()).collect();
        let out: Vec<Row> = KWayMerge::new(rows, comparator(true))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out[0].key().as_str(), "first");
        assert_eq!(out[1].key().as_str(), "second");
    }

    #[test]
    fn test_read_error_ends_merge() {
        let store = ChunkStore::new(1).unwrap();
        let mut broken = vec![row("a", 1), row("b", 5), row("c", 6)];
        let mut intact = vec![row("d", 2), row("e", 3), row("f", 4)];
        let broken = store.write_chunk(&mut broken).unwrap();
        let intact = store.write_chunk(&mut intact).unwrap();

        // Cut the broken chunk inside its second block.
        let path = match &broken {
            Chunk::Disk(disk) => disk.path().to_path_buf(),
            Chunk::Memory(_) => panic!("expected a disk chunk"),
        };
        let first_block = {
            let mut buf = Vec::new();
            rowsort_storage::block::write_block(&mut buf, &[row("a", 1)]).unwrap();
            buf.len() as u64
        };
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(first_block + 3).unwrap();

        let rows = vec![broken.into_rows().unwrap(), intact.into_rows().unwrap()];
        let mut merge = KWayMerge::new(rows, comparator(true)).unwrap();
        // The row read before the failure is still delivered.
        assert_eq!(values(&[merge.next().unwrap().unwrap()]), vec![1]);
        assert_eq!(merge.open_slots(), 0);
        assert_eq!(std::fs::read_dir(store.path()).unwrap().count(), 0);
        assert!(merge.next().unwrap().is_err());
        assert!(merge.next().is_none());
    }
}
