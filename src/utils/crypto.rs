use ring::digest::{Context, SHA256};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use std::time::{SystemTime, UNIX_EPOCH};

pub const ED25519_SEED_LEN: usize = 32;
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    if duration > i64::MAX as u128 {
        return Err(LedgerError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

/// SHA-256 over several parts without concatenating them first
pub fn sha256_concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    for part in parts {
        context.update(part);
    }
    context.finish().as_ref().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&sha256_digest(data))
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| LedgerError::Validation(format!("Invalid base58 encoding: {e}")))
}

/// Rebuild an Ed25519 key pair from its 32-byte seed. The same seed always
/// gives the same pair.
pub fn ed25519_key_pair_from_seed(seed: &[u8]) -> Result<Ed25519KeyPair> {
    if seed.len() != ED25519_SEED_LEN {
        return Err(LedgerError::Crypto(format!(
            "Ed25519 seed must be {ED25519_SEED_LEN} bytes, got {}",
            seed.len()
        )));
    }
    Ed25519KeyPair::from_seed_unchecked(seed)
        .map_err(|e| LedgerError::Crypto(format!("Failed to build key pair from seed: {e}")))
}

pub fn ed25519_public_key(seed: &[u8]) -> Result<Vec<u8>> {
    let key_pair = ed25519_key_pair_from_seed(seed)?;
    Ok(key_pair.public_key().as_ref().to_vec())
}

pub fn ed25519_sign(seed: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let key_pair = ed25519_key_pair_from_seed(seed)?;
    Ok(key_pair.sign(message).as_ref().to_vec())
}

pub fn ed25519_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key = UnparsedPublicKey::new(&ED25519, public_key);
    peer_public_key.verify(message, signature).is_ok()
}
