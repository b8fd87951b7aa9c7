//! Row blocks, the unit of I/O inside a chunk file.
//!
//! Block layout:
//! - flags: 1 byte (bit 0 set = payload is LZ4 compressed)
//! - num_rows: u64 LE
//! - raw_len: u64 LE (encoded size before compression)
//! - stored_len: u64 LE (bytes that follow)
//! - payload: `num_rows` rows in the row codec format

use std::io::{Cursor, Read, Write};

use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;
use rowsort_types::serialization::{read_row, read_u64, read_u8, write_row, write_u64};

pub const LZ4_COMPRESSION: u8 = 1;

/// LZ4 compression is skipped if compressed size >= 90% of original.
const COMPRESSION_DISABLE_THRESHOLD: f64 = 0.9;

/// Size of the fixed block header in bytes.
pub const BLOCK_HEADER_LEN: u64 = 1 + 8 + 8 + 8;

/// Upper bound on the raw and stored length of a block.
const MAX_BLOCK_LEN: u64 = 1 << 30;

/// Smallest encoding of a row: key length and cell count varints.
const MIN_ROW_LEN: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub flags: u8,
    pub num_rows: u64,
    pub raw_len: u64,
    pub stored_len: u64,
}

impl BlockHeader {
    pub fn is_lz4_compressed(&self) -> bool {
        self.flags & LZ4_COMPRESSION != 0
    }

    fn write(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&[self.flags])?;
        write_u64(writer, self.num_rows)?;
        write_u64(writer, self.raw_len)?;
        write_u64(writer, self.stored_len)?;
        Ok(())
    }

    fn read(reader: &mut impl Read) -> Result<Self> {
        Ok(BlockHeader {
            flags: read_u8(reader)?,
            num_rows: read_u64(reader)?,
            raw_len: read_u64(reader)?,
            stored_len: read_u64(reader)?,
        })
    }

    /// Reject headers whose lengths cannot come from [`write_block`], before
    /// anything is allocated from them.
    fn check(&self) -> Result<()> {
        if self.raw_len > MAX_BLOCK_LEN || self.stored_len > MAX_BLOCK_LEN {
            return Err(SortError::Format(format!(
                "Block too large: raw {} bytes, stored {} bytes",
                self.raw_len, self.stored_len
            )));
        }
        if self.num_rows > self.raw_len / MIN_ROW_LEN {
            return Err(SortError::Format(format!(
                "Block claims {} rows in {} bytes",
                self.num_rows, self.raw_len
            )));
        }
        if !self.is_lz4_compressed() && self.stored_len != self.raw_len {
            return Err(SortError::Format(format!(
                "Uncompressed block stores {} of {} bytes",
                self.stored_len, self.raw_len
            )));
        }
        Ok(())
    }
}

/// Encode and write one block. Returns the number of bytes written,
/// header included.
pub fn write_block(writer: &mut impl Write, rows: &[Row]) -> Result<u64> {
    let mut encoded = Vec::new();
    for row in rows {
        write_row(&mut encoded, row)?;
    }
    let raw_len = encoded.len() as u64;

    let compressed = lz4_flex::compress(&encoded);
    let use_compression =
        (compressed.len() as f64) < COMPRESSION_DISABLE_THRESHOLD * (raw_len as f64);
    let (payload, flags) = if use_compression {
        (compressed, LZ4_COMPRESSION)
    } else {
        (encoded, 0)
    };

    let header = BlockHeader {
        flags,
        num_rows: rows.len() as u64,
        raw_len,
        stored_len: payload.len() as u64,
    };
    header.write(writer)?;
    writer.write_all(&payload)?;

    Ok(BLOCK_HEADER_LEN + header.stored_len)
}

/// Read and decode one block.
pub fn read_block(reader: &mut impl Read) -> Result<Vec<Row>> {
    let header = BlockHeader::read(reader)?;
    header.check()?;

    let mut payload = vec![0u8; header.stored_len as usize];
    reader.read_exact(&mut payload)?;

    let decoded = if header.is_lz4_compressed() {
        lz4_flex::decompress(&payload, header.raw_len as usize)
            .map_err(|e| SortError::Format(format!("LZ4 decompression failed: {}", e)))?
    } else {
        payload
    };
    if decoded.len() as u64 != header.raw_len {
        return Err(SortError::Format(format!(
            "Block length mismatch: expected {} bytes, got {}",
            header.raw_len,
            decoded.len()
        )));
    }

    let mut cursor = Cursor::new(decoded);
    let mut rows = Vec::with_capacity(header.num_rows as usize);
    for _ in 0..header.num_rows {
        rows.push(read_row(&mut cursor)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::DataCell;

    fn repetitive_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::new(
                    format!("row{}", i),
                    vec![DataCell::Integer(7), "the same text over and over".into()],
                )
            })
            .collect()
    }

    #[test]
    fn test_repetitive_block_is_compressed() {
        let rows = repetitive_rows(200);
        let mut buf = Vec::new();
        let written = write_block(&mut buf, &rows).unwrap();
        assert_eq!(written, buf.len() as u64);

        let header = BlockHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert!(header.is_lz4_compressed());
        assert!(header.stored_len < header.raw_len);

        let back = read_block(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_tiny_block_stays_raw() {
        let rows = vec![Row::new("a", vec![DataCell::Boolean(true)])];
        let mut buf = Vec::new();
        write_block(&mut buf, &rows).unwrap();

        let header = BlockHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert!(!header.is_lz4_compressed());
        assert_eq!(header.stored_len, header.raw_len);
        assert_eq!(read_block(&mut Cursor::new(&buf)).unwrap(), rows);
    }

    #[test]
    fn test_truncated_payload_fails() {
        let rows = repetitive_rows(10);
        let mut buf = Vec::new();
        write_block(&mut buf, &rows).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(read_block(&mut Cursor::new(&buf)).is_err());
    }

    fn forged(header: BlockHeader) -> Vec<u8> {
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_forged_header_is_format_error() {
        let headers = [
            BlockHeader { flags: 0, num_rows: u64::MAX, raw_len: 0, stored_len: 0 },
            BlockHeader { flags: 0, num_rows: 1, raw_len: u64::MAX, stored_len: u64::MAX },
            BlockHeader { flags: LZ4_COMPRESSION, num_rows: 1, raw_len: u64::MAX, stored_len: 4 },
            BlockHeader { flags: 0, num_rows: 0, raw_len: 8, stored_len: 1 << 20 },
        ];
        for header in headers {
            let err = read_block(&mut Cursor::new(forged(header.clone()))).unwrap_err();
            assert!(matches!(err, SortError::Format(_)), "{:?} gave {:?}", header, err);
        }
    }

    #[test]
    fn test_empty_block_reads_back() {
        let mut buf = Vec::new();
        write_block(&mut buf, &[]).unwrap();
        assert!(read_block(&mut Cursor::new(&buf)).unwrap().is_empty());
    }
}
