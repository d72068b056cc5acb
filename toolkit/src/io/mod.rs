//! Side-effecting boundaries: files, processes and build output.

pub mod cache;
pub mod config_store;
pub mod packaging;
pub mod probe;
pub mod process;
pub mod process_tree;
pub mod settings;
pub mod sink;
