pub mod comparator;
pub mod kway_merge;
pub mod memory;
pub mod progress;
pub mod sort;
