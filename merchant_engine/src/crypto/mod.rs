//! Hashing, canonical JSON and Ed25519 signing.
//!
//! Every identifier that travels over the wire (keys, hashes, signatures, wire transfer ids) is a fixed-size byte
//! array rendered in Crockford base32. The types in [`keys`] and [`hash`] take care of the encoding in both JSON and
//! the database, so the rest of the engine never handles raw strings for them.
mod canonical_json;
mod hash;
mod keys;
mod signatures;

use merchant_common::crockford::Base32Error;
use thiserror::Error;

pub use canonical_json::{canonical_json, hash_json};
pub use hash::{HashCode, ShortHash};
pub use keys::{Blob, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, Nonce, WireTransferId};
pub use signatures::{hash_transfer_deposits, messages, Purpose, SignedMessage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Signature verification failed")]
    InvalidSignature,
    #[error("Invalid public key: {0}")]
    InvalidKey(String),
    #[error("Invalid encoding: {0}")]
    Encoding(#[from] Base32Error),
    #[error("Could not canonicalize JSON: {0}")]
    Canonicalization(String),
}
