use crate::core::transaction::{Amount, COIN, DEFAULT_BLOCK_REWARD};
use crate::mining::difficulty::DifficultyTarget;
use crate::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub network_type: NetworkType,
    pub consensus: ConsensusConfig,
    pub mining: MiningConfig,
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusConfig {
    pub difficulty: u32, // leading zero bits
    pub cutoff_age: u64,
    pub block_reward: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MiningConfig {
    pub threads: usize,
    pub sync_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub num_keys: usize,
    pub tx_interval_ms: u64,
    pub max_tx_fee: Amount,
    pub peer_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            consensus: ConsensusConfig {
                difficulty: 16,
                cutoff_age: 10,
                block_reward: DEFAULT_BLOCK_REWARD,
            },
            mining: MiningConfig::default(),
            node: NodeConfig {
                num_keys: 10,
                tx_interval_ms: 2000,
                max_tx_fee: COIN,
                peer_queue: 256,
            },
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            sync_interval_ms: 5000,
        }
    }
}

impl MiningConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

impl NodeConfig {
    pub fn tx_interval(&self) -> Duration {
        Duration::from_millis(self.tx_interval_ms)
    }
}

impl Config {
    pub fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            consensus: ConsensusConfig {
                difficulty: 8, // Cheap enough to see blocks every few milliseconds
                cutoff_age: 10,
                block_reward: DEFAULT_BLOCK_REWARD,
            },
            mining: MiningConfig {
                threads: num_cpus::get(),
                sync_interval_ms: 500,
            },
            node: NodeConfig {
                num_keys: 10,
                tx_interval_ms: 250,
                max_tx_fee: COIN,
                peer_queue: 256,
            },
        }
    }

    pub fn is_testnet(&self) -> bool {
        self.network_type == NetworkType::Testnet
    }

    pub fn validate(&self) -> Result<()> {
        if self.consensus.difficulty > DifficultyTarget::MAX_BITS {
            return Err(ChainError::Config(format!(
                "difficulty {} exceeds {} bits",
                self.consensus.difficulty,
                DifficultyTarget::MAX_BITS
            )));
        }
        if self.mining.threads == 0 {
            return Err(ChainError::Config("mining.threads must be at least 1".to_string()));
        }
        if self.mining.sync_interval_ms == 0 {
            return Err(ChainError::Config("mining.sync_interval_ms must be positive".to_string()));
        }
        if self.node.num_keys == 0 {
            return Err(ChainError::Config("node.num_keys must be at least 1".to_string()));
        }
        if self.node.tx_interval_ms == 0 {
            return Err(ChainError::Config("node.tx_interval_ms must be positive".to_string()));
        }
        if self.node.peer_queue == 0 {
            return Err(ChainError::Config("node.peer_queue must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Reads `path`, or writes the defaults there when it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn default_path() -> PathBuf {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home_dir).join(".powchain").join("config.json")
    }
}
