//! Typed cell values and their per-type orderings.
//!
//! Every column carries a [`DataType`]; the type hands out a
//! [`CellComparator`] that defines how two cells of that column order.
//! Comparators are resolved once when a row comparator is built, never
//! per comparison.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, SortError};

/// Column type tag. The discriminant is the on-disk tag used by the row codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Integer = 0,
    Double = 1,
    String = 2,
    Boolean = 3,
}

impl TryFrom<u8> for DataType {
    type Error = SortError;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Integer),
            1 => Ok(Self::Double),
            2 => Ok(Self::String),
            3 => Ok(Self::Boolean),
            _ => Err(SortError::Type(format!("Unknown data type tag: {}", value))),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

impl DataType {
    /// The ordering used for cells of this type.
    pub fn comparator(&self) -> CellComparator {
        match self {
            DataType::Integer => CellComparator::Integer,
            DataType::Double => CellComparator::Double,
            DataType::String => CellComparator::String,
            DataType::Boolean => CellComparator::Boolean,
        }
    }

    /// Whether a cell may be stored in a column of this type.
    ///
    /// Missing cells fit every column; integers widen into double columns.
    pub fn accepts(&self, cell: &DataCell) -> bool {
        match (self, cell) {
            (_, DataCell::Missing) => true,
            (DataType::Integer, DataCell::Integer(_)) => true,
            (DataType::Double, DataCell::Double(_) | DataCell::Integer(_)) => true,
            (DataType::String, DataCell::String(_)) => true,
            (DataType::Boolean, DataCell::Boolean(_)) => true,
            _ => false,
        }
    }
}

/// A single cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum DataCell {
    Integer(i64),
    Double(f64),
    String(Arc<str>),
    Boolean(bool),
    Missing,
}

impl DataCell {
    pub fn is_missing(&self) -> bool {
        matches!(self, DataCell::Missing)
    }

    /// Type of the value, `None` for a missing cell.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            DataCell::Integer(_) => Some(DataType::Integer),
            DataCell::Double(_) => Some(DataType::Double),
            DataCell::String(_) => Some(DataType::String),
            DataCell::Boolean(_) => Some(DataType::Boolean),
            DataCell::Missing => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            DataCell::Integer(v) => Some(*v as f64),
            DataCell::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for DataCell {
    fn from(v: i64) -> Self {
        DataCell::Integer(v)
    }
}

impl From<f64> for DataCell {
    fn from(v: f64) -> Self {
        DataCell::Double(v)
    }
}

impl From<&str> for DataCell {
    fn from(v: &str) -> Self {
        DataCell::String(Arc::from(v))
    }
}

impl From<bool> for DataCell {
    fn from(v: bool) -> Self {
        DataCell::Boolean(v)
    }
}

impl std::fmt::Display for DataCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataCell::Integer(v) => write!(f, "{}", v),
            DataCell::Double(v) => write!(f, "{}", v),
            DataCell::String(v) => write!(f, "{}", v),
            DataCell::Boolean(v) => write!(f, "{}", v),
            DataCell::Missing => write!(f, "?"),
        }
    }
}

/// Type-specific ordering of cells.
///
/// Missing cells order before every present value and equal each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellComparator {
    Integer,
    Double,
    String,
    Boolean,
}

impl CellComparator {
    pub fn compare(&self, a: &DataCell, b: &DataCell) -> Ordering {
        match (a, b) {
            (DataCell::Missing, DataCell::Missing) => return Ordering::Equal,
            (DataCell::Missing, _) => return Ordering::Less,
            (_, DataCell::Missing) => return Ordering::Greater,
            _ => {}
        }

        match (self, a, b) {
            (CellComparator::Integer, DataCell::Integer(x), DataCell::Integer(y)) => x.cmp(y),
            (CellComparator::Double, _, _) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => compare_f64(x, y),
                _ => type_rank(a).cmp(&type_rank(b)),
            },
            (CellComparator::String, DataCell::String(x), DataCell::String(y)) => {
                x.as_ref().cmp(y.as_ref())
            }
            (CellComparator::Boolean, DataCell::Boolean(x), DataCell::Boolean(y)) => x.cmp(y),
            // Rows are validated against the table spec before they are compared.
            _ => type_rank(a).cmp(&type_rank(b)),
        }
    }
}

/// NaN sorts after every number and equals itself.
fn compare_f64(x: f64, y: f64) -> Ordering {
    match x.partial_cmp(&y) {
        Some(ord) => ord,
        None => x.is_nan().cmp(&y.is_nan()),
    }
}

fn type_rank(v: &DataCell) -> u8 {
    match v {
        DataCell::Missing => 0,
        DataCell::Integer(_) => 1,
        DataCell::Double(_) => 2,
        DataCell::String(_) => 3,
        DataCell::Boolean(_) => 4,
    }
}
