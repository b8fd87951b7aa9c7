use std::sync::Arc;

use crate::data_cell::DataCell;

/// Unique identifier of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Arc<str>);

impl RowKey {
    pub fn new(key: &str) -> Self {
        RowKey(Arc::from(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        RowKey::new(key)
    }
}

impl From<String> for RowKey {
    fn from(key: String) -> Self {
        RowKey(Arc::from(key))
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A keyed, immutable sequence of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    key: RowKey,
    cells: Vec<DataCell>,
}

impl Row {
    pub fn new(key: impl Into<RowKey>, cells: Vec<DataCell>) -> Self {
        Row {
            key: key.into(),
            cells,
        }
    }

    /// A row of `num_cells` missing cells, used as filler for an absent
    /// counterpart row.
    pub fn missing(key: impl Into<RowKey>, num_cells: usize) -> Self {
        Row::new(key, vec![DataCell::Missing; num_cells])
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn cell(&self, index: usize) -> &DataCell {
        &self.cells[index]
    }

    pub fn cells(&self) -> &[DataCell] {
        &self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn into_parts(self) -> (RowKey, Vec<DataCell>) {
        (self.key, self.cells)
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.key)?;
        for cell in &self.cells {
            write!(f, " {}", cell)?;
        }
        Ok(())
    }
}
