use crate::core::transaction::{Amount, Transaction};
use crate::crypto::hash::{Hash256, HashWriter};
use crate::crypto::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: Hash256,
    pub prev_block_hash: Hash256,
    pub transactions: Vec<Transaction>,
    pub coinbase: Transaction,
    pub nonce: u32,
}

impl Block {
    /// Unsolved block with nonce 0. `hash` is filled in but only meets a
    /// difficulty target by chance; the miner searches for one that does.
    pub fn new(height: u64, prev_block_hash: Hash256, transactions: Vec<Transaction>, coinbase: Transaction) -> Self {
        let mut block = Self {
            height,
            hash: Hash256::zero(),
            prev_block_hash,
            transactions,
            coinbase,
            nonce: 0,
        };
        block.seal();
        block
    }

    /// Height 0, no parent, no body. Built directly rather than mined.
    pub fn genesis(address: PublicKey, reward: Amount) -> Self {
        let coinbase = Transaction::new_coinbase(address, reward, 0);
        Self::new(0, Hash256::zero(), Vec::new(), coinbase)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_block_hash.is_zero()
    }

    /// Hasher state after every field except the nonce, which comes last.
    pub fn hash_prefix(&self) -> HashWriter {
        let mut writer = HashWriter::new();
        writer.put_u64(self.height).put_hash(&self.prev_block_hash);

        writer.put_len(self.transactions.len());
        for tx in &self.transactions {
            tx.write_body(&mut writer);
            writer.put_hash(&tx.hash);
        }

        self.coinbase.write_body(&mut writer);
        writer.put_hash(&self.coinbase.hash);
        writer
    }

    pub fn hash_with_nonce(prefix: &HashWriter, nonce: u32) -> Hash256 {
        let mut writer = prefix.clone();
        writer.put_u32(nonce);
        writer.finish()
    }

    pub fn compute_hash(&self) -> Hash256 {
        Self::hash_with_nonce(&self.hash_prefix(), self.nonce)
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.nonce = nonce;
    }

    /// Stores the recomputed hash.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn contains_transaction(&self, tx_hash: &Hash256) -> bool {
        self.coinbase.hash == *tx_hash || self.transactions.iter().any(|tx| tx.hash == *tx_hash)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========Block==========")?;
        writeln!(f, "Height: {}", self.height)?;
        writeln!(f, "Hash: {}", self.hash)?;
        writeln!(f, "Prev: {}", self.prev_block_hash)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        writeln!(f, "Coinbase:")?;
        writeln!(f, "{}", self.coinbase)?;
        writeln!(f, "Txs:")?;
        for tx in &self.transactions {
            writeln!(f, "{}", tx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, TxOutput, DEFAULT_BLOCK_REWARD};
    use crate::crypto::keys::KeyPair;
    use crate::Result;

    fn sample_block() -> Result<Block> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let genesis = Block::genesis(alice.public_key.clone(), DEFAULT_BLOCK_REWARD);
        let spend = Transaction::new(
            TxInput::new(genesis.coinbase.hash, 0),
            TxOutput::new(DEFAULT_BLOCK_REWARD, bob.public_key.clone()),
            &alice.private_key,
        );
        let coinbase = Transaction::new_coinbase(bob.public_key.clone(), DEFAULT_BLOCK_REWARD, 0);
        Ok(Block::new(1, genesis.hash, vec![spend], coinbase))
    }

    #[test]
    fn test_genesis_block() -> Result<()> {
        let miner = KeyPair::new()?;
        let genesis = Block::genesis(miner.public_key.clone(), DEFAULT_BLOCK_REWARD);

        assert!(genesis.is_genesis());
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.prev_block_hash, Hash256::zero());
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.coinbase.outputs[0].value, DEFAULT_BLOCK_REWARD);
        assert_eq!(genesis.coinbase.outputs[0].address, miner.public_key);
        assert!(genesis.has_valid_hash());

        Ok(())
    }

    #[test]
    fn test_hash_is_deterministic() -> Result<()> {
        let block = sample_block()?;

        assert_eq!(block.compute_hash(), block.compute_hash());
        assert_eq!(block.hash, block.compute_hash());

        Ok(())
    }

    #[test]
    fn test_hash_changes_with_any_field() -> Result<()> {
        let block = sample_block()?;

        let mut nonce = block.clone();
        nonce.set_nonce(1);
        assert_ne!(nonce.compute_hash(), block.hash);

        let mut parent = block.clone();
        parent.prev_block_hash = Hash256::hash(b"elsewhere");
        assert_ne!(parent.compute_hash(), block.hash);

        let mut height = block.clone();
        height.height = 2;
        assert_ne!(height.compute_hash(), block.hash);

        let mut body = block.clone();
        body.transactions[0].inputs[0].signature[10] ^= 0x01;
        assert_ne!(body.compute_hash(), block.hash);

        let mut coinbase = block.clone();
        coinbase.coinbase.timestamp += 1;
        assert_ne!(coinbase.compute_hash(), block.hash);

        Ok(())
    }

    #[test]
    fn test_prefix_hashing_matches_full_hash() -> Result<()> {
        let mut block = sample_block()?;
        let prefix = block.hash_prefix();

        for nonce in [0u32, 1, 77, u32::MAX] {
            block.set_nonce(nonce);
            assert_eq!(Block::hash_with_nonce(&prefix, nonce), block.compute_hash());
        }

        Ok(())
    }

    #[test]
    fn test_contains_transaction() -> Result<()> {
        let block = sample_block()?;

        assert!(block.contains_transaction(&block.transactions[0].hash));
        assert!(block.contains_transaction(&block.coinbase.hash));
        assert!(!block.contains_transaction(&Hash256::hash(b"missing")));
        assert_eq!(block.transaction_count(), 1);

        Ok(())
    }
}
