pub mod block;
pub mod chunk;
pub mod chunk_store;
