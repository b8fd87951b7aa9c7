//! Sorted runs ("chunks") and their readers and writers.
//!
//! A chunk is written once through a [`ChunkWriter`] (or collected in
//! memory), closed, and only then readable as a [`Chunk`]. A disk chunk
//! owns its file: the file is removed when the chunk, or the
//! [`ChunkRows`] iterator that consumed it, is dropped.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;

use crate::block::{read_block, write_block};

/// A closed, immutable sequence of rows.
#[derive(Debug)]
pub enum Chunk {
    Memory(Vec<Row>),
    Disk(DiskChunk),
}

impl Chunk {
    pub fn len(&self) -> u64 {
        match self {
            Chunk::Memory(rows) => rows.len() as u64,
            Chunk::Disk(disk) => disk.num_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self, Chunk::Disk(_))
    }

    /// Read the rows without giving up the chunk. Can be called repeatedly.
    pub fn iter(&self) -> Result<ChunkIter<'_>> {
        match self {
            Chunk::Memory(rows) => Ok(ChunkIter::Memory(rows.iter())),
            Chunk::Disk(disk) => Ok(ChunkIter::Disk(BlockReader::open(&disk.path, disk.num_rows)?)),
        }
    }

    /// Consume the chunk. Its backing file lives exactly as long as the
    /// returned iterator.
    pub fn into_rows(self) -> Result<ChunkRows> {
        match self {
            Chunk::Memory(rows) => Ok(ChunkRows::Memory(rows.into_iter())),
            Chunk::Disk(disk) => {
                let reader = BlockReader::open(&disk.path, disk.num_rows)?;
                Ok(ChunkRows::Disk {
                    reader,
                    _chunk: disk,
                })
            }
        }
    }
}

/// A chunk file on disk. Removes the file on drop.
#[derive(Debug)]
pub struct DiskChunk {
    path: PathBuf,
    num_rows: u64,
}

impl DiskChunk {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DiskChunk {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %e, "failed to remove chunk file");
            }
        }
    }
}

/// Borrowing row iterator over a chunk.
pub enum ChunkIter<'a> {
    Memory(std::slice::Iter<'a, Row>),
    Disk(BlockReader),
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ChunkIter::Memory(rows) => rows.next().cloned().map(Ok),
            ChunkIter::Disk(reader) => reader.next(),
        }
    }
}

/// Owning row iterator over a consumed chunk.
pub enum ChunkRows {
    Memory(std::vec::IntoIter<Row>),
    Disk { reader: BlockReader, _chunk: DiskChunk },
}

impl Iterator for ChunkRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ChunkRows::Memory(rows) => rows.next().map(Ok),
            ChunkRows::Disk { reader, .. } => reader.next(),
        }
    }
}

/// Sequential block-by-block reader of a chunk file.
pub struct BlockReader {
    file: BufReader<File>,
    remaining: u64,
    block: std::vec::IntoIter<Row>,
}

impl BlockReader {
    fn open(path: &Path, num_rows: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(BlockReader {
            file: BufReader::new(file),
            remaining: num_rows,
            block: Vec::new().into_iter(),
        })
    }
}

impl Iterator for BlockReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.block.next() {
            return Some(Ok(row));
        }
        if self.remaining == 0 {
            return None;
        }
        match read_block(&mut self.file) {
            Ok(rows) if rows.is_empty() || rows.len() as u64 > self.remaining => {
                self.remaining = 0;
                Some(Err(SortError::Format(
                    "Chunk block row count does not match chunk length".to_string(),
                )))
            }
            Ok(rows) => {
                self.remaining -= rows.len() as u64;
                self.block = rows.into_iter();
                self.block.next().map(Ok)
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

/// Write-once chunk file writer.
pub struct ChunkWriter {
    file: BufWriter<File>,
    path: PathBuf,
    pending: Vec<Row>,
    block_rows: usize,
    num_rows: u64,
    bytes_written: u64,
}

impl ChunkWriter {
    pub(crate) fn create(path: PathBuf, block_rows: usize) -> Result<Self> {
        let file = File::create(&path)?;
        Ok(ChunkWriter {
            file: BufWriter::new(file),
            path,
            pending: Vec::with_capacity(block_rows),
            block_rows: block_rows.max(1),
            num_rows: 0,
            bytes_written: 0,
        })
    }

    pub fn add_row(&mut self, row: Row) -> Result<()> {
        self.pending.push(row);
        self.num_rows += 1;
        if self.pending.len() >= self.block_rows {
            self.flush_block()?;
        }
        Ok(())
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Bytes written to the file so far (pending rows excluded).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.bytes_written += write_block(&mut self.file, &self.pending)?;
        self.pending.clear();
        Ok(())
    }

    /// Flush everything and hand out the closed chunk.
    pub fn close(mut self) -> Result<Chunk> {
        self.flush_block()?;
        self.file.flush()?;
        tracing::trace!(
            path = %self.path.display(),
            rows = self.num_rows,
            bytes = self.bytes_written,
            "closed chunk"
        );
        Ok(Chunk::Disk(DiskChunk {
            path: self.path,
            num_rows: self.num_rows,
        }))
    }
}
