use crate::crypto::hash::{Hash160, Hash256};
use crate::crypto::signatures::{Signature, SignatureUtils};
use crate::{ChainError, Result};
use rand::{rngs::OsRng, seq::SliceRandom, RngCore};
use secp256k1::{PublicKey as Secp256k1PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

/// Compressed SEC1 public key. This is the address an output is locked to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl PrivateKey {
    pub fn new() -> Result<Self> {
        let mut rng = OsRng;
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);

        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| ChainError::Crypto(format!("Failed to create private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(ChainError::Crypto("Private key must be 32 bytes".to_string()));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| ChainError::Crypto(format!("Invalid private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let public_key = Secp256k1PublicKey::from_secret_key_global(&self.key);

        PublicKey {
            key: public_key.serialize().to_vec(),
        }
    }

    pub fn sign(&self, message: &Hash256) -> Signature {
        SignatureUtils::sign(&self.key, message)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 33 && bytes.len() != 65 {
            return Err(ChainError::Crypto("Invalid public key length".to_string()));
        }

        let _ = Secp256k1PublicKey::from_slice(bytes)
            .map_err(|e| ChainError::Crypto(format!("Invalid public key: {}", e)))?;

        Ok(Self {
            key: bytes.to_vec(),
        })
    }

    /// Wraps raw bytes without curve validation. Verification against such a
    /// key simply fails.
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self { key: bytes }
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn hash160(&self) -> Hash160 {
        Hash160::hash_sha256(&self.key)
    }

    /// Base58check rendering for operators. Never hashed.
    pub fn to_address(&self) -> String {
        let hash160 = self.hash160();

        let mut data = Vec::with_capacity(25);
        data.push(0x00);
        data.extend_from_slice(hash160.as_bytes());

        let hash = Hash256::double_hash(&data);
        data.extend_from_slice(&hash.as_bytes()[0..4]);

        format!("pow{}", bs58::encode(data).into_string())
    }

    pub fn verify(&self, message: &Hash256, signature: &Signature) -> Result<bool> {
        let public_key = Secp256k1PublicKey::from_slice(&self.key)
            .map_err(|e| ChainError::Crypto(format!("Invalid public key: {}", e)))?;

        SignatureUtils::verify(&public_key, message, signature)
    }
}

impl KeyPair {
    pub fn new() -> Result<Self> {
        let private_key = PrivateKey::new()?;
        Ok(Self::from_private_key(private_key))
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();

        Self {
            private_key,
            public_key,
        }
    }

    pub fn address(&self) -> String {
        self.public_key.to_address()
    }
}

/// The node's locally generated keys: reward addresses for the miner and
/// signing keys for the pending-transaction generator.
#[derive(Debug, Clone)]
pub struct KeyRing {
    pairs: Vec<KeyPair>,
}

impl KeyRing {
    pub fn generate(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(ChainError::InvalidInput("Key ring needs at least one key".to_string()));
        }

        let pairs = (0..count)
            .map(|_| KeyPair::new())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.pairs.iter().map(|pair| pair.public_key.clone()).collect()
    }

    pub fn random(&self) -> Option<&KeyPair> {
        self.pairs.choose(&mut rand::thread_rng())
    }

    pub fn find(&self, address: &PublicKey) -> Option<&PrivateKey> {
        self.pairs
            .iter()
            .find(|pair| &pair.public_key == address)
            .map(|pair| &pair.private_key)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.key))
    }
}
