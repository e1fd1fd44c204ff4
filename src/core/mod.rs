pub mod error;
pub mod node_store;
pub mod persistence;
