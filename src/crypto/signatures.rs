use crate::crypto::hash::Hash256;
use crate::{ChainError, Result};
use secp256k1::{ecdsa::Signature as Secp256k1Signature, Message, PublicKey as Secp256k1PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};

/// Compact (r || s) ECDSA signature over a 32-byte digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
}

impl Signature {
    pub const LEN: usize = 64;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(ChainError::Crypto("Invalid signature length".to_string()));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];

        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self { r, s })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        bytes
    }

    pub fn from_secp256k1(signature: Secp256k1Signature) -> Self {
        let compact = signature.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[0..32]);
        s.copy_from_slice(&compact[32..64]);

        Self { r, s }
    }

    pub fn to_secp256k1(&self) -> Result<Secp256k1Signature> {
        Secp256k1Signature::from_compact(&self.to_bytes())
            .map_err(|e| ChainError::Crypto(format!("Invalid signature: {}", e)))
    }
}

// Signature creation and verification utilities
pub struct SignatureUtils;

impl SignatureUtils {
    pub fn sign(secret_key: &SecretKey, message_hash: &Hash256) -> Signature {
        let message = Message::from_digest(*message_hash.as_bytes());
        let signature = SECP256K1.sign_ecdsa(&message, secret_key);
        Signature::from_secp256k1(signature)
    }

    pub fn verify(public_key: &Secp256k1PublicKey, message_hash: &Hash256, signature: &Signature) -> Result<bool> {
        let message = Message::from_digest(*message_hash.as_bytes());
        let secp_signature = signature.to_secp256k1()?;

        match SECP256K1.verify_ecdsa(&message, &secp_signature, public_key) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
