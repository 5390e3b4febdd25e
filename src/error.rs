use crate::crypto::hash::Hash256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Block {0} already known")]
    DuplicateBlock(Hash256),

    #[error("Unknown parent block {0}")]
    UnknownParent(Hash256),

    #[error("Invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error("Block at height {height} is too far behind tip at height {tip_height}")]
    StaleBlock { height: u64, tip_height: u64 },

    #[error("Invalid block hash")]
    InvalidBlockHash,

    #[error("Invalid difficulty target")]
    InvalidDifficulty,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction hash mismatch for {0}")]
    InvalidTransactionHash(Hash256),

    #[error("UTXO not found: {txid}:{index}")]
    MissingUtxo { txid: Hash256, index: u32 },

    #[error("Output {txid}:{index} already exists")]
    DuplicateOutput { txid: Hash256, index: u32 },

    #[error("Double spend detected for transaction: {0}")]
    DoubleSpend(Hash256),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Mining error: {0}")]
    Mining(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<secp256k1::Error> for ChainError {
    fn from(err: secp256k1::Error) -> Self {
        ChainError::Crypto(format!("secp256k1 error: {}", err))
    }
}
