//! Proof-of-work mining

pub mod miner;
pub mod difficulty;

pub use miner::{mine_block, Miner, MiningStats};
pub use difficulty::DifficultyTarget;
