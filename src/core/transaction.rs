use crate::crypto::hash::{Hash256, HashWriter};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::signatures::Signature;
use crate::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value in base units.
pub type Amount = u64;

pub const COIN: Amount = 100_000_000;

pub const DEFAULT_BLOCK_REWARD: Amount = 50 * COIN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub hash: Hash256,
    pub is_coinbase: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_hash: Hash256,
    pub prev_output_index: u32,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub address: PublicKey,
}

/// UTXO identifier: the creating transaction's hash plus the output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl Transaction {
    /// Reward transaction paying `reward + fee` to `address`.
    pub fn new_coinbase(address: PublicKey, reward: Amount, fee: Amount) -> Self {
        let mut tx = Self {
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(reward.saturating_add(fee), address)],
            hash: Hash256::zero(),
            is_coinbase: true,
            timestamp: now_nanos(),
        };
        tx.rehash();
        tx
    }

    /// Single-input, single-output transfer signed by `signing_key`.
    pub fn new(input: TxInput, output: TxOutput, signing_key: &PrivateKey) -> Self {
        let mut tx = Self::from_parts(vec![input], vec![output]);
        let digest = tx.signature_hash(0);
        tx.inputs[0].signature = signing_key.sign(&digest).to_bytes();
        tx.rehash();
        tx
    }

    /// Unsigned transaction; sign each input with [`Transaction::sign_input`].
    pub fn from_parts(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            inputs,
            outputs,
            hash: Hash256::zero(),
            is_coinbase: false,
            timestamp: now_nanos(),
        };
        tx.rehash();
        tx
    }

    pub fn sign_input(&mut self, input_index: usize, signing_key: &PrivateKey) -> Result<()> {
        if input_index >= self.inputs.len() {
            return Err(ChainError::Transaction(format!(
                "Invalid input index {} for transaction with {} inputs",
                input_index,
                self.inputs.len()
            )));
        }

        let digest = self.signature_hash(input_index);
        self.inputs[input_index].signature = signing_key.sign(&digest).to_bytes();
        self.rehash();
        Ok(())
    }

    /// Digest an input's owner signs: the spent outpoint and every output.
    pub fn signing_digest(prev_tx_hash: &Hash256, prev_output_index: u32, outputs: &[TxOutput]) -> Hash256 {
        let mut writer = HashWriter::new();
        writer.put_hash(prev_tx_hash).put_u32(prev_output_index);
        for output in outputs {
            writer.put_bytes(output.address.to_bytes()).put_u64(output.value);
        }
        writer.finish()
    }

    fn signature_hash(&self, input_index: usize) -> Hash256 {
        let input = &self.inputs[input_index];
        Self::signing_digest(&input.prev_tx_hash, input.prev_output_index, &self.outputs)
    }

    /// Checks `input`'s signature against the owner of the output it spends.
    /// Any decoding or verification error counts as invalid.
    pub fn validate_input_signature(&self, input: &TxInput, expected: &PublicKey) -> bool {
        let digest = Self::signing_digest(&input.prev_tx_hash, input.prev_output_index, &self.outputs);

        Signature::from_bytes(&input.signature)
            .and_then(|signature| expected.verify(&digest, &signature))
            .unwrap_or(false)
    }

    pub(crate) fn write_body(&self, writer: &mut HashWriter) {
        writer.put_len(self.inputs.len());
        for input in &self.inputs {
            writer
                .put_hash(&input.prev_tx_hash)
                .put_u32(input.prev_output_index)
                .put_bytes(&input.signature);
        }

        writer.put_len(self.outputs.len());
        for output in &self.outputs {
            writer.put_u64(output.value).put_bytes(output.address.to_bytes());
        }

        writer.put_bool(self.is_coinbase).put_i64(self.timestamp);
    }

    pub fn compute_hash(&self) -> Hash256 {
        let mut writer = HashWriter::new();
        self.write_body(&mut writer);
        writer.finish()
    }

    pub fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Coinbase shape: flagged, no inputs, exactly one output.
    pub fn is_well_formed_coinbase(&self) -> bool {
        self.is_coinbase && self.inputs.is_empty() && self.outputs.len() == 1
    }

    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
    }

    pub fn spent_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(TxInput::outpoint)
    }

    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.hash, vout)
    }
}

impl TxInput {
    pub fn new(prev_tx_hash: Hash256, prev_output_index: u32) -> Self {
        Self {
            prev_tx_hash,
            prev_output_index,
            signature: Vec::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_tx_hash, self.prev_output_index)
    }
}

impl TxOutput {
    pub fn new(value: Amount, address: PublicKey) -> Self {
        Self { value, address }
    }
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

pub fn format_amount(value: Amount) -> String {
    format!("{}.{:08}", value / COIN, value % COIN)
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_output_value().unwrap_or(Amount::MAX);
        let recipient = self
            .outputs
            .first()
            .map(|output| output.address.to_address())
            .unwrap_or_else(|| "-".to_string());

        if self.is_coinbase {
            write!(f, "  =Tx {} coinbase to {} for {}", self.hash, recipient, format_amount(total))
        } else {
            let source = self
                .inputs
                .first()
                .map(|input| input.outpoint().to_string())
                .unwrap_or_else(|| "-".to_string());
            write!(f, "  =Tx {} from {} to {} for {}", self.hash, source, recipient, format_amount(total))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    fn funded_spend(owner: &KeyPair, recipient: &KeyPair) -> (Transaction, Transaction) {
        let coinbase = Transaction::new_coinbase(owner.public_key.clone(), DEFAULT_BLOCK_REWARD, 0);
        let spend = Transaction::new(
            TxInput::new(coinbase.hash, 0),
            TxOutput::new(DEFAULT_BLOCK_REWARD, recipient.public_key.clone()),
            &owner.private_key,
        );
        (coinbase, spend)
    }

    #[test]
    fn test_coinbase_transaction() -> Result<()> {
        let miner = KeyPair::new()?;
        let tx = Transaction::new_coinbase(miner.public_key.clone(), DEFAULT_BLOCK_REWARD, 1500);

        assert!(tx.is_coinbase);
        assert!(tx.is_well_formed_coinbase());
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, DEFAULT_BLOCK_REWARD + 1500);
        assert_eq!(tx.outputs[0].address, miner.public_key);
        assert!(tx.has_valid_hash());

        Ok(())
    }

    #[test]
    fn test_transaction_hash() -> Result<()> {
        let miner = KeyPair::new()?;
        let tx = Transaction::new_coinbase(miner.public_key.clone(), 1000, 0);

        assert_eq!(tx.compute_hash(), tx.compute_hash());
        assert_eq!(tx.hash, tx.compute_hash());
        assert_ne!(tx.hash, Hash256::zero());

        let mut later = tx.clone();
        later.timestamp += 1;
        assert_ne!(later.compute_hash(), tx.hash);

        let mut richer = tx.clone();
        richer.outputs[0].value += 1;
        assert_ne!(richer.compute_hash(), tx.hash);

        Ok(())
    }

    #[test]
    fn test_signed_transaction_validates() -> Result<()> {
        let owner = KeyPair::new()?;
        let recipient = KeyPair::new()?;
        let (_, spend) = funded_spend(&owner, &recipient);

        assert!(!spend.is_coinbase);
        assert!(spend.has_valid_hash());
        assert_eq!(spend.inputs[0].signature.len(), Signature::LEN);
        assert!(spend.validate_input_signature(&spend.inputs[0], &owner.public_key));

        Ok(())
    }

    #[test]
    fn test_signature_fails_for_other_key() -> Result<()> {
        let owner = KeyPair::new()?;
        let recipient = KeyPair::new()?;
        let (_, spend) = funded_spend(&owner, &recipient);

        assert!(!spend.validate_input_signature(&spend.inputs[0], &recipient.public_key));

        Ok(())
    }

    #[test]
    fn test_signature_bit_flip_fails() -> Result<()> {
        let owner = KeyPair::new()?;
        let recipient = KeyPair::new()?;
        let (_, spend) = funded_spend(&owner, &recipient);

        for bit in [0usize, 7, 100, 255, 300, 511] {
            let mut tampered = spend.inputs[0].clone();
            tampered.signature[bit / 8] ^= 1 << (bit % 8);
            assert!(!spend.validate_input_signature(&tampered, &owner.public_key));
        }

        Ok(())
    }

    #[test]
    fn test_address_bit_flip_fails() -> Result<()> {
        let owner = KeyPair::new()?;
        let recipient = KeyPair::new()?;
        let (_, spend) = funded_spend(&owner, &recipient);

        for bit in [0usize, 1, 9, 130, 263] {
            let mut bytes = owner.public_key.to_bytes().to_vec();
            bytes[bit / 8] ^= 1 << (bit % 8);
            let tampered = PublicKey::from_raw(bytes);
            assert!(!spend.validate_input_signature(&spend.inputs[0], &tampered));
        }

        Ok(())
    }

    #[test]
    fn test_changed_outputs_invalidate_signature() -> Result<()> {
        let owner = KeyPair::new()?;
        let recipient = KeyPair::new()?;
        let (_, mut spend) = funded_spend(&owner, &recipient);

        spend.outputs[0].address = owner.public_key.clone();
        assert!(!spend.validate_input_signature(&spend.inputs[0], &owner.public_key));

        Ok(())
    }

    #[test]
    fn test_multi_input_signing() -> Result<()> {
        let alice = KeyPair::new()?;
        let bob = KeyPair::new()?;
        let a = Transaction::new_coinbase(alice.public_key.clone(), 10, 0);
        let b = Transaction::new_coinbase(bob.public_key.clone(), 20, 0);

        let mut tx = Transaction::from_parts(
            vec![TxInput::new(a.hash, 0), TxInput::new(b.hash, 0)],
            vec![TxOutput::new(30, alice.public_key.clone())],
        );
        tx.sign_input(0, &alice.private_key)?;
        tx.sign_input(1, &bob.private_key)?;

        assert!(tx.has_valid_hash());
        assert!(tx.validate_input_signature(&tx.inputs[0], &alice.public_key));
        assert!(tx.validate_input_signature(&tx.inputs[1], &bob.public_key));
        assert!(tx.sign_input(2, &bob.private_key).is_err());

        Ok(())
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(DEFAULT_BLOCK_REWARD), "50.00000000");
        assert_eq!(format_amount(COIN + 1), "1.00000001");
    }
}
