//! Binary row codec used for chunk payloads.
//!
//! Layout of one row:
//! - row key: varint length + UTF-8 bytes
//! - cell count: varint
//! - per cell: 1-byte tag followed by the value
//!   - `0` integer: 8 bytes LE
//!   - `1` double: 8 bytes LE
//!   - `2` string: varint length + UTF-8 bytes
//!   - `3` boolean: 1 byte
//!   - `0xFF` missing: no payload
//!
//! Varints are unsigned LEB128 (7 bits per byte, high bit = continuation).

use std::io::{Read, Write};
use std::sync::Arc;

use crate::data_cell::{DataCell, DataType};
use crate::error::{Result, SortError};
use crate::row::{Row, RowKey};

const MISSING_TAG: u8 = 0xFF;

/// Upper bound on a single string or cell count, guards against corrupt input.
const SANITY_LIMIT: u64 = 256 * 1024 * 1024;

// --- Primitives ---

pub fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_u64(writer: &mut impl Write, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_varint(reader: &mut impl Read) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = read_u8(reader)?;
        if shift >= 64 {
            return Err(SortError::Format("Varint overflows u64".to_string()));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

pub fn write_varint(writer: &mut impl Write, mut value: u64) -> Result<()> {
    let mut buf = [0u8; 10];
    let mut n = 0;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf[n] = byte;
            n += 1;
            break;
        }
        buf[n] = byte | 0x80;
        n += 1;
    }
    writer.write_all(&buf[..n])?;
    Ok(())
}

fn read_str(reader: &mut impl Read) -> Result<String> {
    let len = read_varint(reader)?;
    if len > SANITY_LIMIT {
        return Err(SortError::Format(format!(
            "String length {} exceeds sanity limit",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| SortError::Format(format!("Invalid UTF-8: {}", e)))
}

fn write_str(writer: &mut impl Write, s: &str) -> Result<()> {
    write_varint(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

// --- Cells and rows ---

pub fn write_cell(writer: &mut impl Write, cell: &DataCell) -> Result<()> {
    match cell {
        DataCell::Integer(v) => {
            writer.write_all(&[DataType::Integer as u8])?;
            writer.write_all(&v.to_le_bytes())?;
        }
        DataCell::Double(v) => {
            writer.write_all(&[DataType::Double as u8])?;
            writer.write_all(&v.to_le_bytes())?;
        }
        DataCell::String(v) => {
            writer.write_all(&[DataType::String as u8])?;
            write_str(writer, v)?;
        }
        DataCell::Boolean(v) => {
            writer.write_all(&[DataType::Boolean as u8, u8::from(*v)])?;
        }
        DataCell::Missing => writer.write_all(&[MISSING_TAG])?,
    }
    Ok(())
}

pub fn read_cell(reader: &mut impl Read) -> Result<DataCell> {
    let tag = read_u8(reader)?;
    if tag == MISSING_TAG {
        return Ok(DataCell::Missing);
    }
    match DataType::try_from(tag)? {
        DataType::Integer => Ok(DataCell::Integer(read_u64(reader)? as i64)),
        DataType::Double => Ok(DataCell::Double(f64::from_bits(read_u64(reader)?))),
        DataType::String => Ok(DataCell::String(Arc::from(read_str(reader)?))),
        DataType::Boolean => match read_u8(reader)? {
            0 => Ok(DataCell::Boolean(false)),
            1 => Ok(DataCell::Boolean(true)),
            other => Err(SortError::Format(format!("Invalid boolean byte {}", other))),
        },
    }
}

pub fn write_row(writer: &mut impl Write, row: &Row) -> Result<()> {
    write_str(writer, row.key().as_str())?;
    write_varint(writer, row.num_cells() as u64)?;
    for cell in row.cells() {
        write_cell(writer, cell)?;
    }
    Ok(())
}

pub fn read_row(reader: &mut impl Read) -> Result<Row> {
    let key = RowKey::from(read_str(reader)?);
    let num_cells = read_varint(reader)?;
    if num_cells > SANITY_LIMIT {
        return Err(SortError::Format(format!(
            "Cell count {} exceeds sanity limit",
            num_cells
        )));
    }
    let mut cells = Vec::with_capacity(num_cells as usize);
    for _ in 0..num_cells {
        cells.push(read_cell(reader)?);
    }
    Ok(Row::new(key, cells))
}
