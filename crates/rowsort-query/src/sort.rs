use rowsort_types::row::Row;

use crate::comparator::RowComparator;

/// Sort a row buffer in place. The sort is stable: rows comparing equal
/// keep their input order.
pub fn sort_buffer(rows: &mut [Row], comparator: &RowComparator) {
    rows.sort_by(|a, b| comparator.compare(a, b));
}
