//! Row ordering over a column selection.
//!
//! A [`RowComparator`] evaluates its sort columns in order; the first
//! column that does not compare equal decides. Each column's
//! [`CellComparator`] is taken from the column type when the comparator
//! is built.

use std::cmp::Ordering;
use std::collections::HashSet;

use rowsort_types::data_cell::CellComparator;
use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;
use rowsort_types::table_spec::{TableSpec, ROWKEY_SORT_COLUMN};

/// What a sort column reads from a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Column(usize),
    RowKey,
}

/// One criterion of a row comparator.
#[derive(Debug, Clone)]
pub struct SortColumn {
    pub target: SortTarget,
    pub descending: bool,
    /// Put missing cells last regardless of direction.
    pub missings_last: bool,
    comparator: CellComparator,
}

impl SortColumn {
    pub fn column(index: usize, comparator: CellComparator) -> Self {
        SortColumn {
            target: SortTarget::Column(index),
            descending: false,
            missings_last: false,
            comparator,
        }
    }

    pub fn row_key() -> Self {
        SortColumn {
            target: SortTarget::RowKey,
            descending: false,
            missings_last: false,
            comparator: CellComparator::String,
        }
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn missings_last(mut self, missings_last: bool) -> Self {
        self.missings_last = missings_last;
        self
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let index = match self.target {
            SortTarget::RowKey => {
                let cmp = a.key().as_str().cmp(b.key().as_str());
                return self.directed(cmp);
            }
            SortTarget::Column(index) => index,
        };

        let (ca, cb) = (a.cell(index), b.cell(index));
        if self.missings_last && (ca.is_missing() || cb.is_missing()) {
            // Independent of the direction, hence not passed through `directed`.
            return ca.is_missing().cmp(&cb.is_missing());
        }
        self.directed(self.comparator.compare(ca, cb))
    }

    fn directed(&self, cmp: Ordering) -> Ordering {
        if self.descending {
            cmp.reverse()
        } else {
            cmp
        }
    }
}

/// Total order on rows defined by an ordered list of sort columns.
#[derive(Debug, Clone)]
pub struct RowComparator {
    columns: Vec<SortColumn>,
}

impl RowComparator {
    pub fn new(columns: Vec<SortColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(SortError::Config(
                "A row comparator needs at least one sort column".to_string(),
            ));
        }
        Ok(RowComparator { columns })
    }

    /// Order by row key only.
    pub fn by_row_key(ascending: bool) -> Self {
        RowComparator {
            columns: vec![SortColumn::row_key().descending(!ascending)],
        }
    }

    /// Build a comparator from column names and per-column directions.
    ///
    /// `names` may contain [`ROWKEY_SORT_COLUMN`] to sort by the row key.
    /// All checks happen here, before any row is read.
    pub fn for_columns<S: AsRef<str>>(
        spec: &TableSpec,
        names: &[S],
        ascending: &[bool],
        missings_last: bool,
    ) -> Result<Self> {
        if names.len() != ascending.len() {
            return Err(SortError::Config(format!(
                "Length of arguments vary: {} vs. {}",
                names.len(),
                ascending.len()
            )));
        }
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_ref()) {
                return Err(SortError::Config(format!(
                    "Sort columns must not contain duplicates: {}",
                    name.as_ref()
                )));
            }
        }

        let mut columns = Vec::with_capacity(names.len());
        for (name, &asc) in names.iter().zip(ascending) {
            let name = name.as_ref();
            let column = match spec.find_column_index(name) {
                Some(index) => {
                    let comparator = spec.column(index).dtype.comparator();
                    SortColumn::column(index, comparator)
                        .descending(!asc)
                        .missings_last(missings_last)
                }
                None if name == ROWKEY_SORT_COLUMN => SortColumn::row_key().descending(!asc),
                None => {
                    return Err(SortError::Config(format!(
                        "Could not find column name: {}",
                        name
                    )))
                }
            };
            columns.push(column);
        }
        RowComparator::new(columns)
    }

    pub fn columns(&self) -> &[SortColumn] {
        &self.columns
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for column in &self.columns {
            let cmp = column.compare(a, b);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    }

    /// Compare two possibly absent rows. An absent row is greater than any
    /// present row; two absent rows are equal.
    pub fn compare_nullable(&self, a: Option<&Row>, b: Option<&Row>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => self.compare(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::data_cell::{DataCell, DataType};

    fn spec() -> TableSpec {
        TableSpec::from_pairs(&[("a", DataType::Integer), ("b", DataType::String)]).unwrap()
    }

    fn row(key: &str, a: DataCell, b: &str) -> Row {
        Row::new(key, vec![a, b.into()])
    }

    #[test]
    fn test_first_non_equal_column_decides() {
        let cmp = RowComparator::for_columns(&spec(), &["a", "b"], &[true, false], false).unwrap();
        let r1 = row("r1", DataCell::Integer(1), "x");
        let r2 = row("r2", DataCell::Integer(1), "y");
        let r3 = row("r3", DataCell::Integer(0), "z");
        // Tie on a, b descending.
        assert_eq!(cmp.compare(&r1, &r2), Ordering::Greater);
        assert_eq!(cmp.compare(&r3, &r1), Ordering::Less);
        assert_eq!(cmp.compare(&r1, &r1), Ordering::Equal);
    }

    #[test]
    fn test_row_key_pseudo_column() {
        let cmp =
            RowComparator::for_columns(&spec(), &[ROWKEY_SORT_COLUMN], &[false], false).unwrap();
        let r1 = row("k1", DataCell::Integer(1), "x");
        let r2 = row("k2", DataCell::Integer(1), "x");
        assert_eq!(cmp.compare(&r1, &r2), Ordering::Greater);
        assert_eq!(RowComparator::by_row_key(true).compare(&r1, &r2), Ordering::Less);
    }

    #[test]
    fn test_missing_cells() {
        let present = row("p", DataCell::Integer(-100), "x");
        let missing = row("m", DataCell::Missing, "x");

        // Type-defined order: missing is smallest, so it flips with direction.
        let asc = RowComparator::for_columns(&spec(), &["a"], &[true], false).unwrap();
        let desc = RowComparator::for_columns(&spec(), &["a"], &[false], false).unwrap();
        assert_eq!(asc.compare(&missing, &present), Ordering::Less);
        assert_eq!(desc.compare(&missing, &present), Ordering::Greater);

        // missings_last: at the end in both directions.
        let asc = RowComparator::for_columns(&spec(), &["a"], &[true], true).unwrap();
        let desc = RowComparator::for_columns(&spec(), &["a"], &[false], true).unwrap();
        assert_eq!(asc.compare(&missing, &present), Ordering::Greater);
        assert_eq!(desc.compare(&missing, &present), Ordering::Greater);
        assert_eq!(desc.compare(&missing, &missing), Ordering::Equal);
    }

    #[test]
    fn test_configuration_errors() {
        let spec = spec();
        let err = RowComparator::for_columns(&spec, &["a", "b"], &[true], false).unwrap_err();
        assert!(matches!(err, SortError::Config(_)));

        let err = RowComparator::for_columns(&spec, &["a", "a"], &[true, true], false).unwrap_err();
        assert!(matches!(err, SortError::Config(_)));

        let err = RowComparator::for_columns(&spec, &["nope"], &[true], false).unwrap_err();
        assert!(err.to_string().contains("nope"));

        let empty: [&str; 0] = [];
        assert!(RowComparator::for_columns(&spec, &empty, &[], false).is_err());
    }

    #[test]
    fn test_compare_nullable() {
        let cmp = RowComparator::by_row_key(true);
        let r = row("r", DataCell::Integer(1), "x");
        assert_eq!(cmp.compare_nullable(None, None), Ordering::Equal);
        assert_eq!(cmp.compare_nullable(None, Some(&r)), Ordering::Greater);
        assert_eq!(cmp.compare_nullable(Some(&r), None), Ordering::Less);
        assert_eq!(cmp.compare_nullable(Some(&r), Some(&r)), Ordering::Equal);
    }
}
