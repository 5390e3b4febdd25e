//! Command line interface and node bootstrap

pub mod commands;
pub mod node;

pub use commands::run_cli;
pub use node::{Node, TxGenerator};
