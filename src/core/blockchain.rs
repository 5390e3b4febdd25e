use crate::config::ConsensusConfig;
use crate::core::block::Block;
use crate::core::transaction::{format_amount, Amount, Transaction, DEFAULT_BLOCK_REWARD};
use crate::core::utxo::UtxoPool;
use crate::crypto::hash::Hash256;
use crate::crypto::keys::PublicKey;
use crate::mining::difficulty::DifficultyTarget;
use crate::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Consensus constants fixed for the lifetime of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Required leading zero bits of a block hash.
    pub difficulty: u32,
    /// How far below the tip an incoming block may still be.
    pub cutoff_age: u64,
    pub block_reward: Amount,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            difficulty: 16,
            cutoff_age: 10,
            block_reward: DEFAULT_BLOCK_REWARD,
        }
    }
}

impl From<&ConsensusConfig> for ChainParams {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            difficulty: config.difficulty,
            cutoff_age: config.cutoff_age,
            block_reward: config.block_reward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipInfo {
    pub hash: Hash256,
    pub height: u64,
}

/// Operator-facing summary of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub tip: Hash256,
    pub height: u64,
    pub genesis: Hash256,
    pub block_count: usize,
    pub pending_txs: usize,
    pub accumulated_fee: Amount,
    pub working_utxos: usize,
    pub difficulty: u32,
    pub cutoff_age: u64,
}

#[derive(Debug)]
struct ChainState {
    blocks: HashMap<Hash256, Block>,
    utxo_snapshots: HashMap<Hash256, Arc<UtxoPool>>,
    tip: Hash256,
    tip_height: u64,
    pending_txs: Vec<Transaction>,
    working_pool: UtxoPool,
    accumulated_fee: Amount,
}

/// Every known block, the ledger state after each of them, the tip and the
/// pending transactions on top of it.
///
/// Shared by reference between miner workers and transaction producers. All
/// mutation goes through [`Blockchain::try_process_block`] and
/// [`Blockchain::try_process_tx`], which take the state's write lock.
#[derive(Debug)]
pub struct Blockchain {
    params: ChainParams,
    target: DifficultyTarget,
    genesis: Hash256,
    state: RwLock<ChainState>,
}

impl Blockchain {
    /// Chain holding only a genesis block that pays the reward to `genesis_address`.
    pub fn new(params: ChainParams, genesis_address: PublicKey) -> Result<Self> {
        let genesis = Block::genesis(genesis_address, params.block_reward);
        let genesis_hash = genesis.hash;

        let mut snapshot = UtxoPool::new();
        snapshot.apply(&genesis.coinbase)?;

        log::info!("📦 Genesis block {} created", genesis_hash);

        let state = ChainState {
            blocks: HashMap::from([(genesis_hash, genesis)]),
            working_pool: snapshot.clone(),
            utxo_snapshots: HashMap::from([(genesis_hash, Arc::new(snapshot))]),
            tip: genesis_hash,
            tip_height: 0,
            pending_txs: Vec::new(),
            accumulated_fee: 0,
        };

        Ok(Self {
            params,
            target: DifficultyTarget::new(params.difficulty),
            genesis: genesis_hash,
            state: RwLock::new(state),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn target(&self) -> DifficultyTarget {
        self.target
    }

    /// Validates `block` against its parent and commits it. Returns whether
    /// it was committed; the rejection reason is logged.
    pub fn process_block(&self, block: &Block) -> bool {
        match self.try_process_block(block) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("❌ Rejected block {} at height {}: {}", block.hash.short(), block.height, e);
                false
            }
        }
    }

    pub fn try_process_block(&self, block: &Block) -> Result<()> {
        let mut state = self.write_state();

        if state.blocks.contains_key(&block.hash) {
            return Err(ChainError::DuplicateBlock(block.hash));
        }

        let parent = state
            .blocks
            .get(&block.prev_block_hash)
            .ok_or(ChainError::UnknownParent(block.prev_block_hash))?;

        if block.height != parent.height + 1 {
            return Err(ChainError::InvalidHeight {
                expected: parent.height + 1,
                got: block.height,
            });
        }

        if state.tip_height.saturating_sub(block.height) > self.params.cutoff_age {
            return Err(ChainError::StaleBlock {
                height: block.height,
                tip_height: state.tip_height,
            });
        }

        if !block.has_valid_hash() {
            return Err(ChainError::InvalidBlockHash);
        }

        if !self.target.is_met_by(&block.hash) {
            return Err(ChainError::InvalidDifficulty);
        }

        let parent_snapshot = state
            .utxo_snapshots
            .get(&block.prev_block_hash)
            .cloned()
            .ok_or(ChainError::UnknownParent(block.prev_block_hash))?;
        let snapshot = Arc::new(parent_snapshot.with_block(block, self.params.block_reward)?);

        state.blocks.insert(block.hash, block.clone());
        state.utxo_snapshots.insert(block.hash, Arc::clone(&snapshot));

        if block.height > state.tip_height {
            state.tip = block.hash;
            state.tip_height = block.height;
            state.pending_txs.clear();
            state.working_pool = (*snapshot).clone();
            state.accumulated_fee = 0;

            log::info!(
                "✅ Block {} committed as tip at height {} ({} txs)",
                block.hash.short(),
                block.height,
                block.transactions.len()
            );
        } else {
            log::info!(
                "🔀 Block {} committed on a side branch at height {}",
                block.hash.short(),
                block.height
            );
        }

        Ok(())
    }

    /// Validates `tx` against the working pool and queues it for mining.
    pub fn process_tx(&self, tx: &Transaction) -> bool {
        match self.try_process_tx(tx) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("❌ Rejected transaction {}: {}", tx.hash.short(), e);
                false
            }
        }
    }

    /// Returns the fee the transaction contributes.
    pub fn try_process_tx(&self, tx: &Transaction) -> Result<Amount> {
        if tx.is_coinbase {
            return Err(ChainError::InvalidCoinbase(
                "coinbase transactions cannot enter the pending pool".to_string(),
            ));
        }

        let mut state = self.write_state();

        // apply is all-or-nothing, so the working pool is only touched on success.
        let fee = state.working_pool.apply(tx)?;
        state.pending_txs.push(tx.clone());
        state.accumulated_fee = state.accumulated_fee.saturating_add(fee);

        log::debug!("💰 Accepted transaction {} (fee {})", tx.hash.short(), format_amount(fee));
        Ok(fee)
    }

    /// Unsolved block on top of the tip carrying a snapshot of the pending
    /// transactions and a coinbase that collects their fees.
    pub fn assemble_candidate_block(&self, reward_address: PublicKey) -> Block {
        let state = self.read_state();
        let coinbase = Transaction::new_coinbase(reward_address, self.params.block_reward, state.accumulated_fee);

        Block::new(
            state.tip_height + 1,
            state.tip,
            state.pending_txs.clone(),
            coinbase,
        )
    }

    pub fn current_height(&self) -> u64 {
        self.read_state().tip_height
    }

    pub fn pending_tx_count(&self) -> usize {
        self.read_state().pending_txs.len()
    }

    pub fn tip(&self) -> TipInfo {
        let state = self.read_state();
        TipInfo {
            hash: state.tip,
            height: state.tip_height,
        }
    }

    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.read_state().blocks.contains_key(hash)
    }

    pub fn get_block(&self, hash: &Hash256) -> Option<Block> {
        self.read_state().blocks.get(hash).cloned()
    }

    pub fn block_count(&self) -> usize {
        self.read_state().blocks.len()
    }

    /// Ledger state after the block `hash`. Shared and never mutated.
    pub fn utxo_snapshot(&self, hash: &Hash256) -> Option<Arc<UtxoPool>> {
        self.read_state().utxo_snapshots.get(hash).cloned()
    }

    /// Copy of the tip's ledger with every pending transaction applied.
    pub fn working_pool(&self) -> UtxoPool {
        self.read_state().working_pool.clone()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.read_state().pending_txs.clone()
    }

    pub fn accumulated_fee(&self) -> Amount {
        self.read_state().accumulated_fee
    }

    /// Blocks from the tip back to genesis.
    pub fn main_chain(&self) -> Vec<Block> {
        let state = self.read_state();
        let mut chain = Vec::with_capacity(state.tip_height as usize + 1);
        let mut cursor = state.blocks.get(&state.tip);

        while let Some(block) = cursor {
            chain.push(block.clone());
            cursor = if block.is_genesis() {
                None
            } else {
                state.blocks.get(&block.prev_block_hash)
            };
        }

        chain
    }

    pub fn chain_info(&self) -> ChainInfo {
        let state = self.read_state();
        ChainInfo {
            tip: state.tip,
            height: state.tip_height,
            genesis: self.genesis,
            block_count: state.blocks.len(),
            pending_txs: state.pending_txs.len(),
            accumulated_fee: state.accumulated_fee,
            working_utxos: state.working_pool.len(),
            difficulty: self.params.difficulty,
            cutoff_age: self.params.cutoff_age,
        }
    }
}

impl fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========Chain==========")?;
        writeln!(f, "Tip: {} (height {})", self.tip, self.height)?;
        writeln!(f, "Genesis: {}", self.genesis)?;
        writeln!(f, "Blocks known: {}", self.block_count)?;
        writeln!(f, "Pending txs: {} (fees {})", self.pending_txs, format_amount(self.accumulated_fee))?;
        writeln!(f, "Working UTXOs: {}", self.working_utxos)?;
        write!(f, "Difficulty: {} bits, cutoff age: {}", self.difficulty, self.cutoff_age)
    }
}
