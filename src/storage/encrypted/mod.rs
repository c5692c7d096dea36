//! Payload encryption for QR transfers
//!
//! Ledger data is public and stays in the clear. What needs protection is the
//! pre-signed transfer carried inside a QR code between generation and scan.

pub mod cipher;

pub use cipher::{Aes256GcmCipher, EncryptionResult, SecureKey, SecureMemory};

use crate::error::Result;

/// Cryptographically secure random bytes (salts, nonces)
pub fn generate_random_bytes(length: usize) -> Result<Vec<u8>> {
    use rand::RngCore;
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(bytes)
}
