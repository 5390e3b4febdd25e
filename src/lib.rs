//! powchain - a minimal proof-of-work UTXO ledger node
//!
//! This library implements:
//! - UTXO transactions signed with secp256k1
//! - Blocks chained by SHA-256 with a leading-zero-bits difficulty
//! - A fork-aware chain engine with per-block ledger snapshots
//! - A multi-worker nonce search miner
//! - A peer message handler and the node CLI

pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod cli;
pub mod error;
pub mod config;

pub use error::{ChainError, Result};
