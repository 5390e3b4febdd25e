use crate::core::block::Block;
use crate::core::transaction::{format_amount, Amount, OutPoint, Transaction, TxOutput};
use crate::{ChainError, Result};
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Ledger snapshot: every unspent output keyed by its outpoint.
///
/// Cloning produces an independent copy. Committed snapshots are shared
/// behind an `Arc` and never mutated; tentative work happens on a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoPool {
    outputs: HashMap<OutPoint, TxOutput>,
}

impl UtxoPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.outputs.get(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &TxOutput)> {
        self.outputs.iter()
    }

    pub fn total_value(&self) -> Amount {
        self.outputs.values().map(|output| output.value).sum()
    }

    /// Checks `tx` against this pool without touching it and returns the fee
    /// it would pay. Coinbase transactions pay no fee.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<Amount> {
        if !tx.has_valid_hash() {
            return Err(ChainError::InvalidTransactionHash(tx.hash));
        }

        for vout in 0..tx.outputs.len() as u32 {
            if self.outputs.contains_key(&tx.outpoint(vout)) {
                return Err(ChainError::DuplicateOutput { txid: tx.hash, index: vout });
            }
        }

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut input_total: Amount = 0;

        for input in &tx.inputs {
            let outpoint = input.outpoint();

            if !seen.insert(outpoint) {
                return Err(ChainError::DoubleSpend(tx.hash));
            }

            let spent = self.outputs.get(&outpoint).ok_or(ChainError::MissingUtxo {
                txid: outpoint.txid,
                index: outpoint.vout,
            })?;

            if !tx.validate_input_signature(input, &spent.address) {
                return Err(ChainError::InvalidSignature);
            }

            input_total = input_total
                .checked_add(spent.value)
                .ok_or_else(|| ChainError::Transaction("Input value overflow".to_string()))?;
        }

        let output_total = tx
            .total_output_value()
            .ok_or_else(|| ChainError::Transaction("Output value overflow".to_string()))?;

        if tx.is_coinbase {
            if !tx.is_well_formed_coinbase() {
                return Err(ChainError::InvalidCoinbase(
                    "coinbase must have no inputs and exactly one output".to_string(),
                ));
            }
            return Ok(0);
        }

        if output_total > input_total {
            return Err(ChainError::InsufficientFunds {
                required: output_total,
                available: input_total,
            });
        }

        Ok(input_total - output_total)
    }

    /// Applies `tx` all-or-nothing: on rejection the pool is unchanged.
    /// Returns the fee contribution.
    pub fn apply(&mut self, tx: &Transaction) -> Result<Amount> {
        let fee = self.validate_transaction(tx)?;

        for (vout, output) in tx.outputs.iter().enumerate() {
            self.outputs.insert(tx.outpoint(vout as u32), output.clone());
        }
        for outpoint in tx.spent_outpoints() {
            self.outputs.remove(&outpoint);
        }

        Ok(fee)
    }

    /// Applies the block's transactions in order, then its coinbase, whose
    /// value must equal `block_reward` plus the collected fees. Returns the
    /// total fee. On rejection the pool is unchanged.
    pub fn apply_block(&mut self, block: &Block, block_reward: Amount) -> Result<Amount> {
        let mut staged = self.clone();
        let fees = staged.apply_block_in_place(block, block_reward)?;
        *self = staged;
        Ok(fees)
    }

    /// Copy of this pool with `block` applied.
    pub fn with_block(&self, block: &Block, block_reward: Amount) -> Result<Self> {
        let mut next = self.clone();
        next.apply_block_in_place(block, block_reward)?;
        Ok(next)
    }

    fn apply_block_in_place(&mut self, block: &Block, block_reward: Amount) -> Result<Amount> {
        let mut fees: Amount = 0;

        for tx in &block.transactions {
            if tx.is_coinbase {
                return Err(ChainError::InvalidCoinbase(format!(
                    "transaction {} in block body is flagged coinbase",
                    tx.hash
                )));
            }
            let fee = self.apply(tx)?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| ChainError::Transaction("Fee overflow".to_string()))?;
        }

        if !block.coinbase.is_well_formed_coinbase() {
            return Err(ChainError::InvalidCoinbase(
                "coinbase must have no inputs and exactly one output".to_string(),
            ));
        }

        let expected = block_reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::InvalidCoinbase("reward overflow".to_string()))?;
        let claimed = block.coinbase.outputs[0].value;
        if claimed != expected {
            return Err(ChainError::InvalidCoinbase(format!(
                "claims {} but reward plus fees is {}",
                claimed, expected
            )));
        }

        self.apply(&block.coinbase)?;
        Ok(fees)
    }

    /// Uniformly random unspent output, or `None` when the pool is empty.
    pub fn pick_random_unspent(&self) -> Option<(OutPoint, TxOutput)> {
        self.outputs
            .iter()
            .choose(&mut rand::thread_rng())
            .map(|(outpoint, output)| (*outpoint, output.clone()))
    }
}

impl fmt::Display for UtxoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========UTXO Pool==========")?;
        let mut entries: Vec<_> = self.outputs.iter().collect();
        entries.sort_by_key(|(outpoint, _)| **outpoint);
        for (outpoint, output) in entries {
            writeln!(
                f,
                "{} idx: {} val: {} to {}",
                outpoint.txid,
                outpoint.vout,
                format_amount(output.value),
                output.address.to_address()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, DEFAULT_BLOCK_REWARD};
    use crate::crypto::hash::Hash256;
    use crate::crypto::keys::KeyPair;

    fn funded_pool(owner: &KeyPair) -> (UtxoPool, Transaction) {
        let mut pool = UtxoPool::new();
        let coinbase = Transaction::new_coinbase(owner.public_key.clone(), DEFAULT_BLOCK_REWARD, 0);
        pool.apply(&coinbase).expect("coinbase applies");
        (pool, coinbase)
    }

    fn spend(from: &KeyPair, outpoint: OutPoint, value: Amount, to: &KeyPair) -> Transaction {
        Transaction::new(
            TxInput::new(outpoint.txid, outpoint.vout),
            TxOutput::new(value, to.public_key.clone()),
            &from.private_key,
        )
    }

    #[test]
    fn test_utxo_pool_coinbase() -> Result<()> {
        let miner = KeyPair::new()?;
        let (pool, coinbase) = funded_pool(&miner);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&coinbase.outpoint(0)), Some(&coinbase.outputs[0]));
        assert_eq!(pool.total_value(), DEFAULT_BLOCK_REWARD);

        Ok(())
    }

    #[test]
    fn test_apply_creates_every_output() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);

        let mut tx = Transaction::from_parts(
            vec![TxInput::new(coinbase.hash, 0)],
            vec![
                TxOutput::new(20 * crate::core::COIN, bob.public_key.clone()),
                TxOutput::new(29 * crate::core::COIN, alice.public_key.clone()),
            ],
        );
        tx.sign_input(0, &alice.private_key)?;

        let fee = pool.apply(&tx)?;
        assert_eq!(fee, crate::core::COIN);
        assert!(!pool.contains(&coinbase.outpoint(0)));
        for (i, output) in tx.outputs.iter().enumerate() {
            assert_eq!(pool.get(&tx.outpoint(i as u32)), Some(output));
        }

        Ok(())
    }

    #[test]
    fn test_missing_utxo_leaves_pool_unchanged() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let (mut pool, _) = funded_pool(&alice);
        let before = pool.clone();

        let ghost = OutPoint::new(Hash256::hash(b"nowhere"), 0);
        let tx = spend(&alice, ghost, 1, &bob);

        assert!(matches!(pool.apply(&tx), Err(ChainError::MissingUtxo { .. })));
        assert_eq!(pool, before);

        Ok(())
    }

    #[test]
    fn test_bad_signature_leaves_pool_unchanged() -> Result<()> {
        let alice = KeyPair::new()?;
        let mallory = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);
        let before = pool.clone();

        let theft = spend(&mallory, coinbase.outpoint(0), DEFAULT_BLOCK_REWARD, &mallory);

        assert!(matches!(pool.apply(&theft), Err(ChainError::InvalidSignature)));
        assert_eq!(pool, before);
        assert!(!pool.contains(&theft.outpoint(0)));

        Ok(())
    }

    #[test]
    fn test_double_spend_rejected() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);

        let first = spend(&alice, coinbase.outpoint(0), DEFAULT_BLOCK_REWARD, &bob);
        let second = spend(&alice, coinbase.outpoint(0), DEFAULT_BLOCK_REWARD - 1, &alice);

        pool.apply(&first)?;
        assert!(matches!(pool.apply(&second), Err(ChainError::MissingUtxo { .. })));

        Ok(())
    }

    #[test]
    fn test_same_outpoint_twice_in_one_transaction() -> Result<()> {
        let alice = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);

        let mut tx = Transaction::from_parts(
            vec![TxInput::new(coinbase.hash, 0), TxInput::new(coinbase.hash, 0)],
            vec![TxOutput::new(2 * DEFAULT_BLOCK_REWARD, alice.public_key.clone())],
        );
        tx.sign_input(0, &alice.private_key)?;
        tx.sign_input(1, &alice.private_key)?;

        assert!(matches!(pool.apply(&tx), Err(ChainError::DoubleSpend(_))));
        assert!(pool.contains(&coinbase.outpoint(0)));

        Ok(())
    }

    #[test]
    fn test_outputs_exceeding_inputs_rejected() -> Result<()> {
        let alice = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);
        let before = pool.clone();

        let inflated = spend(&alice, coinbase.outpoint(0), DEFAULT_BLOCK_REWARD + 1, &alice);

        assert!(matches!(
            pool.apply(&inflated),
            Err(ChainError::InsufficientFunds { required, available })
                if required == DEFAULT_BLOCK_REWARD + 1 && available == DEFAULT_BLOCK_REWARD
        ));
        assert_eq!(pool, before);

        Ok(())
    }

    #[test]
    fn test_duplicate_output_rejected() -> Result<()> {
        let alice = KeyPair::new()?;
        let (mut pool, coinbase) = funded_pool(&alice);
        let before = pool.clone();

        assert!(matches!(pool.apply(&coinbase), Err(ChainError::DuplicateOutput { .. })));
        assert_eq!(pool, before);

        Ok(())
    }

    #[test]
    fn test_tampered_hash_rejected() -> Result<()> {
        let alice = KeyPair::new()?;
        let mut coinbase = Transaction::new_coinbase(alice.public_key.clone(), 5, 0);
        coinbase.outputs[0].value = 500;

        let mut pool = UtxoPool::new();
        assert!(matches!(pool.apply(&coinbase), Err(ChainError::InvalidTransactionHash(_))));
        assert!(pool.is_empty());

        Ok(())
    }

    #[test]
    fn test_copy_is_independent() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let (pool, coinbase) = funded_pool(&alice);

        let mut copy = pool.clone();
        copy.apply(&spend(&alice, coinbase.outpoint(0), DEFAULT_BLOCK_REWARD, &bob))?;

        assert!(pool.contains(&coinbase.outpoint(0)));
        assert!(!copy.contains(&coinbase.outpoint(0)));

        Ok(())
    }

    #[test]
    fn test_pick_random_unspent() -> Result<()> {
        assert!(UtxoPool::new().pick_random_unspent().is_none());

        let alice = KeyPair::new()?;
        let (pool, coinbase) = funded_pool(&alice);
        let (outpoint, output) = pool.pick_random_unspent().expect("one entry");

        assert_eq!(outpoint, coinbase.outpoint(0));
        assert_eq!(output, coinbase.outputs[0]);

        Ok(())
    }

    #[test]
    fn test_apply_block_collects_fees_into_coinbase() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let genesis = Block::genesis(alice.public_key.clone(), DEFAULT_BLOCK_REWARD);
        let mut pool = UtxoPool::new();
        pool.apply(&genesis.coinbase)?;

        let tx = spend(&alice, genesis.coinbase.outpoint(0), DEFAULT_BLOCK_REWARD - 700, &bob);
        let coinbase = Transaction::new_coinbase(bob.public_key.clone(), DEFAULT_BLOCK_REWARD, 700);
        let block = Block::new(1, genesis.hash, vec![tx.clone()], coinbase.clone());

        assert_eq!(pool.apply_block(&block, DEFAULT_BLOCK_REWARD)?, 700);
        assert!(pool.contains(&tx.outpoint(0)));
        assert!(pool.contains(&coinbase.outpoint(0)));
        assert!(!pool.contains(&genesis.coinbase.outpoint(0)));

        Ok(())
    }

    #[test]
    fn test_apply_block_rejects_greedy_coinbase_atomically() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let genesis = Block::genesis(alice.public_key.clone(), DEFAULT_BLOCK_REWARD);
        let mut pool = UtxoPool::new();
        pool.apply(&genesis.coinbase)?;
        let before = pool.clone();

        let tx = spend(&alice, genesis.coinbase.outpoint(0), DEFAULT_BLOCK_REWARD, &bob);
        let greedy = Transaction::new_coinbase(bob.public_key.clone(), DEFAULT_BLOCK_REWARD, 1);
        let block = Block::new(1, genesis.hash, vec![tx], greedy);

        assert!(matches!(
            pool.apply_block(&block, DEFAULT_BLOCK_REWARD),
            Err(ChainError::InvalidCoinbase(_))
        ));
        assert_eq!(pool, before);

        Ok(())
    }

    #[test]
    fn test_apply_block_rejects_coinbase_in_body() -> Result<()> {
        let alice = KeyPair::new()?;
        let genesis = Block::genesis(alice.public_key.clone(), DEFAULT_BLOCK_REWARD);
        let pool = UtxoPool::new();

        let minted = Transaction::new_coinbase(alice.public_key.clone(), DEFAULT_BLOCK_REWARD, 0);
        let coinbase = Transaction::new_coinbase(alice.public_key.clone(), DEFAULT_BLOCK_REWARD, 1);
        let block = Block::new(1, genesis.hash, vec![minted], coinbase);

        assert!(matches!(
            pool.with_block(&block, DEFAULT_BLOCK_REWARD),
            Err(ChainError::InvalidCoinbase(_))
        ));

        Ok(())
    }
}
