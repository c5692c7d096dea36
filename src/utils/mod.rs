//! Utility functions and helpers
//!
//! Hashing, Ed25519 signing, base58 encoding, timestamps and the bincode
//! layer used by storage and hashing.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ed25519_key_pair_from_seed,
    ed25519_public_key, ed25519_sign, ed25519_verify, sha256_concat, sha256_digest, sha256_hex,
    ED25519_PUBLIC_KEY_LEN, ED25519_SEED_LEN,
};

pub use serialization::{deserialize, serialize};
