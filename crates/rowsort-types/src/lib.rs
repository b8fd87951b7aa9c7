pub mod data_cell;
pub mod error;
pub mod row;
pub mod serialization;
pub mod table_spec;
