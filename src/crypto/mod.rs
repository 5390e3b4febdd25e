//! Cryptographic primitives: hashing, keys and signatures

pub mod keys;
pub mod signatures;
pub mod hash;

pub use keys::{KeyPair, KeyRing, PrivateKey, PublicKey};
pub use signatures::Signature;
pub use hash::{Hash256, HashWriter};
