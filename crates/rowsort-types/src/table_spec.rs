//! Table schema: ordered, named, typed columns.

use std::collections::HashSet;

use crate::data_cell::DataType;
use crate::error::{Result, SortError};
use crate::row::Row;

/// Pseudo column name selecting the row key as a sort criterion.
pub const ROWKEY_SORT_COLUMN: &str = "-ROWKEY -";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DataType,
}

impl ColumnSpec {
    pub fn new(name: &str, dtype: DataType) -> Self {
        ColumnSpec {
            name: name.to_string(),
            dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSpec {
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Build a spec; column names must be unique.
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SortError::Config(format!(
                    "Duplicate column name: {}",
                    col.name
                )));
            }
        }
        Ok(TableSpec { columns })
    }

    /// Convenience constructor from `(name, type)` pairs.
    pub fn from_pairs(pairs: &[(&str, DataType)]) -> Result<Self> {
        TableSpec::new(
            pairs
                .iter()
                .map(|&(name, dtype)| ColumnSpec::new(name, dtype))
                .collect(),
        )
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnSpec {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check arity and cell types of a row against this spec.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.num_cells() != self.columns.len() {
            return Err(SortError::Type(format!(
                "Row {} has {} cells, spec has {} columns",
                row.key(),
                row.num_cells(),
                self.columns.len()
            )));
        }
        for (cell, col) in row.cells().iter().zip(&self.columns) {
            if !col.dtype.accepts(cell) {
                return Err(SortError::Type(format!(
                    "Row {}: cell {:?} does not fit {} column {}",
                    row.key(),
                    cell,
                    col.dtype,
                    col.name
                )));
            }
        }
        Ok(())
    }

    /// Concatenate the columns of `other` after the columns of `self`.
    pub fn append(&self, other: &TableSpec) -> Result<TableSpec> {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        TableSpec::new(columns)
    }
}
