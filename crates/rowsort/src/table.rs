//! In-memory row table.

use rowsort_types::error::Result;
use rowsort_types::row::Row;
use rowsort_types::table_spec::TableSpec;

/// A spec plus rows that conform to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTable {
    spec: TableSpec,
    rows: Vec<Row>,
}

impl RowTable {
    /// Build a table, checking every row against `spec`.
    pub fn new(spec: TableSpec, rows: Vec<Row>) -> Result<Self> {
        for row in &rows {
            spec.validate_row(row)?;
        }
        Ok(RowTable { spec, rows })
    }

    pub fn empty(spec: TableSpec) -> Self {
        RowTable {
            spec,
            rows: Vec::new(),
        }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn num_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Row source over clones of the rows, as consumed by the sorter.
    pub fn iter_rows(&self) -> impl Iterator<Item = Result<Row>> + '_ {
        self.rows.iter().cloned().map(Ok)
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
