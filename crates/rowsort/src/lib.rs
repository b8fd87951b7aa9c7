//! Chunked external merge sort for typed row tables.
//!
//! ```no_run
//! use rowsort::{ExecutionMonitor, RowTable, TableSorter};
//! # fn sort(table: &RowTable) -> rowsort::Result<()> {
//! let sorted = TableSorter::for_table(table)
//!     .sort_columns(&["price", "name"], &[false, true])?
//!     .sort(&ExecutionMonitor::new())?;
//! for row in sorted.iter()? {
//!     println!("{}", row?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod append;
mod external_sort;
pub mod sorter;
pub mod table;

pub use append::ColumnAppender;
pub use rowsort_config::SortConfig;
pub use rowsort_query::comparator::RowComparator;
pub use rowsort_query::memory::{MemoryProbe, MemoryService};
pub use rowsort_query::progress::{CancelHandle, ExecutionMonitor};
pub use rowsort_types::data_cell::{DataCell, DataType};
pub use rowsort_types::error::{Result, SortError};
pub use rowsort_types::row::{Row, RowKey};
pub use rowsort_types::table_spec::{ColumnSpec, TableSpec, ROWKEY_SORT_COLUMN};
pub use sorter::{SortStats, SortStrategy, SortedRows, SortedTable, TableSorter};
pub use table::RowTable;
