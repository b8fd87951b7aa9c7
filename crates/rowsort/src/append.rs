//! Column appender: joins two tables on their row keys.
//!
//! Both inputs are sorted by row key with a [`TableSorter`] and then
//! merge-joined. A key present on one side only gets missing cells for
//! the columns of the other side. Output rows are ordered by row key.

use std::cmp::Ordering;

use rowsort_config::SortConfig;
use rowsort_query::comparator::RowComparator;
use rowsort_query::progress::ExecutionMonitor;
use rowsort_types::error::Result;
use rowsort_types::row::Row;

use crate::external_sort::Ticker;
use crate::sorter::{SortedRows, TableSorter};
use crate::table::RowTable;

#[derive(Debug, Clone, Default)]
pub struct ColumnAppender {
    config: SortConfig,
    sort_in_memory: bool,
}

impl ColumnAppender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SortConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn sort_in_memory(mut self, sort_in_memory: bool) -> Self {
        self.sort_in_memory = sort_in_memory;
        self
    }

    /// Append the columns of `right` to `left`. Column names of the two
    /// tables must not overlap.
    pub fn append(&self, left: &RowTable, right: &RowTable, exec: &ExecutionMonitor) -> Result<RowTable> {
        let spec = left.spec().append(right.spec())?;
        let left_width = left.spec().num_columns();
        let right_width = right.spec().num_columns();

        exec.set_message("Sorting left table");
        let mut left_rows = self.sort_by_key(left, &exec.create_sub_progress(0.25))?;
        exec.set_message("Sorting right table");
        let mut right_rows = self.sort_by_key(right, &exec.create_sub_progress(0.25))?;

        exec.set_message("Appending columns");
        let join_exec = exec.create_sub_progress(0.5);
        let total = left.num_rows().max(right.num_rows());
        let mut ticker = Ticker::new(&join_exec, Some(total), self.config.check_interval);

        let mut output = Vec::with_capacity(total as usize);
        let mut l = left_rows.next().transpose()?;
        let mut r = right_rows.next().transpose()?;
        loop {
            let ordering = match (&l, &r) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.key().cmp(b.key()),
            };
            // An absent counterpart row is replaced by a filler row.
            let (left_row, right_row) = match ordering {
                Ordering::Less => {
                    let Some(row) = std::mem::replace(&mut l, left_rows.next().transpose()?) else {
                        break;
                    };
                    let filler = Row::missing(row.key().clone(), right_width);
                    (row, filler)
                }
                Ordering::Greater => {
                    let Some(row) = std::mem::replace(&mut r, right_rows.next().transpose()?) else {
                        break;
                    };
                    (Row::missing(row.key().clone(), left_width), row)
                }
                Ordering::Equal => {
                    let (Some(a), Some(b)) = (
                        std::mem::replace(&mut l, left_rows.next().transpose()?),
                        std::mem::replace(&mut r, right_rows.next().transpose()?),
                    ) else {
                        break;
                    };
                    (a, b)
                }
            };
            let (key, mut cells) = left_row.into_parts();
            cells.extend(right_row.into_parts().1);
            let joined = Row::new(key, cells);
            output.push(joined);
            ticker.tick("Appending columns")?;
        }
        join_exec.set_progress(1.0);
        tracing::debug!(rows = output.len(), columns = spec.num_columns(), "appended columns");

        RowTable::new(spec, output)
    }

    fn sort_by_key(&self, table: &RowTable, exec: &ExecutionMonitor) -> Result<SortedRows> {
        TableSorter::for_table(table)
            .row_comparator(RowComparator::by_row_key(true))?
            .config(self.config.clone())?
            .sort_in_memory(self.sort_in_memory)
            .sorted_rows(exec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::{DataCell, DataType};
    use rowsort_types::error::SortError;
    use rowsort_types::table_spec::TableSpec;

    #[test]
    fn test_append_fills_missing() {
        let left = RowTable::new(
            TableSpec::from_pairs(&[("n", DataType::Integer)]).unwrap(),
            vec![
                Row::new("b", vec![DataCell::Integer(1)]),
                Row::new("a", vec![DataCell::Integer(2)]),
            ],
        )
        .unwrap();
        let right = RowTable::new(
            TableSpec::from_pairs(&[("s", DataType::String)]).unwrap(),
            vec![Row::new("c", vec!["x".into()]), Row::new("a", vec!["y".into()])],
        )
        .unwrap();

        let joined = ColumnAppender::new()
            .append(&left, &right, &ExecutionMonitor::new())
            .unwrap();
        assert_eq!(joined.spec().column_names(), vec!["n", "s"]);
        let printed: Vec<String> = joined.rows().iter().map(|r| r.to_string()).collect();
        assert_eq!(printed, vec!["a: 2 y", "b: 1 ?", "c: ? x"]);
    }

    #[test]
    fn test_overlapping_columns_rejected() {
        let spec = TableSpec::from_pairs(&[("n", DataType::Integer)]).unwrap();
        let t = RowTable::empty(spec);
        let err = ColumnAppender::new()
            .append(&t, &t, &ExecutionMonitor::new())
            .unwrap_err();
        assert!(matches!(err, SortError::Config(_)));
    }
}
