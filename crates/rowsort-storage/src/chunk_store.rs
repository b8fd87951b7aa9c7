//! Owner of all chunk files created by one sort.
//!
//! Chunk files live in a private temporary directory that is removed when
//! the store is dropped. Closed chunks delete their own files as soon as
//! they are consumed; anything left behind (for example the partially
//! written chunk of a canceled sort) is reclaimed together with the
//! directory.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

use rowsort_types::error::Result;
use rowsort_types::row::Row;

use crate::chunk::{Chunk, ChunkWriter};

#[derive(Debug)]
pub struct ChunkStore {
    dir: TempDir,
    /// Monotonic counter for unique chunk file names.
    counter: AtomicU64,
    block_rows: usize,
}

impl ChunkStore {
    /// Create a store below the system temp directory.
    pub fn new(block_rows: usize) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("rowsort_").tempdir()?;
        Ok(Self::from_dir(dir, block_rows))
    }

    /// Create a store below `parent`.
    pub fn in_dir(parent: &Path, block_rows: usize) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("rowsort_").tempdir_in(parent)?;
        Ok(Self::from_dir(dir, block_rows))
    }

    fn from_dir(dir: TempDir, block_rows: usize) -> Self {
        tracing::debug!(path = %dir.path().display(), "created spill directory");
        ChunkStore {
            dir,
            counter: AtomicU64::new(0),
            block_rows,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of chunk files created so far.
    pub fn chunks_created(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Open a new disk-backed chunk writer.
    pub fn create_writer(&self) -> Result<ChunkWriter> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.path().join(format!("chunk_{:06}.bin", id));
        ChunkWriter::create(path, self.block_rows)
    }

    /// Open a container that collects rows either in memory or on disk.
    pub fn open_chunk(&self, on_disk: bool) -> Result<ChunkBuilder> {
        if on_disk {
            Ok(ChunkBuilder::Disk(self.create_writer()?))
        } else {
            Ok(ChunkBuilder::Memory(Vec::new()))
        }
    }

    /// Write an already sorted buffer into a new disk chunk, draining it.
    pub fn write_chunk(&self, buffer: &mut Vec<Row>) -> Result<Chunk> {
        let mut writer = self.create_writer()?;
        for row in buffer.drain(..) {
            writer.add_row(row)?;
        }
        writer.close()
    }
}

/// A chunk under construction.
pub enum ChunkBuilder {
    Memory(Vec<Row>),
    Disk(ChunkWriter),
}

impl ChunkBuilder {
    pub fn add_row(&mut self, row: Row) -> Result<()> {
        match self {
            ChunkBuilder::Memory(rows) => {
                rows.push(row);
                Ok(())
            }
            ChunkBuilder::Disk(writer) => writer.add_row(row),
        }
    }

    pub fn num_rows(&self) -> u64 {
        match self {
            ChunkBuilder::Memory(rows) => rows.len() as u64,
            ChunkBuilder::Disk(writer) => writer.num_rows(),
        }
    }

    pub fn close(self) -> Result<Chunk> {
        match self {
            ChunkBuilder::Memory(rows) => Ok(Chunk::Memory(rows)),
            ChunkBuilder::Disk(writer) => writer.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::DataCell;

    #[test]
    fn test_store_directory_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let store = ChunkStore::in_dir(parent.path(), 16).unwrap();
        let dir = store.path().to_path_buf();

        // An abandoned, never closed writer leaves its file behind ...
        let mut writer = store.create_writer().unwrap();
        writer.add_row(Row::new("a", vec![DataCell::Integer(1)])).unwrap();
        drop(writer);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

        // ... until the store itself goes away.
        drop(store);
        assert!(!dir.exists());
    }

    #[test]
    fn test_open_chunk_memory_and_disk() {
        let store = ChunkStore::new(2).unwrap();
        for on_disk in [false, true] {
            let mut builder = store.open_chunk(on_disk).unwrap();
            for i in 0..5 {
                builder
                    .add_row(Row::new(format!("r{}", i), vec![DataCell::Integer(i)]))
                    .unwrap();
            }
            assert_eq!(builder.num_rows(), 5);
            let chunk = builder.close().unwrap();
            assert_eq!(chunk.is_on_disk(), on_disk);
            assert_eq!(chunk.len(), 5);
        }
        assert_eq!(store.chunks_created(), 1);
    }

    #[test]
    fn test_write_chunk_drains_buffer() {
        let store = ChunkStore::new(8).unwrap();
        let mut buffer: Vec<Row> = (0..3)
            .map(|i| Row::new(format!("r{}", i), vec![DataCell::Integer(i)]))
            .collect();
        let chunk = store.write_chunk(&mut buffer).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(chunk.len(), 3);
    }
}
