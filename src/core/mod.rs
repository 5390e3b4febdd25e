//! Core ledger components

pub mod blockchain;
pub mod block;
pub mod transaction;
pub mod utxo;

pub use blockchain::{Blockchain, ChainInfo, ChainParams, TipInfo};
pub use block::Block;
pub use transaction::{Amount, OutPoint, Transaction, TxInput, TxOutput, COIN, DEFAULT_BLOCK_REWARD};
pub use utxo::UtxoPool;
