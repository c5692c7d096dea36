use crate::config::KdfParams;
use crate::error::{LedgerError, Result};
use crate::wallet::stretch;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionResult {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Key bytes that are zeroed on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureKey {
    key: Vec<u8>,
}

impl SecureKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Stretch a password with Argon2id into a 256-bit key
    pub fn derive(password: &[u8], salt: &[u8], kdf: &KdfParams) -> Result<Self> {
        let stretched = stretch(password, salt, kdf)?;
        Ok(Self::new(stretched.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey")
            .field("length", &self.key.len())
            .finish()
    }
}

/// AES-256-GCM with a fresh random nonce per message
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    pub fn new(key: SecureKey) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(LedgerError::Encryption(
                "AES-256-GCM requires a 32-byte key".to_string(),
            ));
        }

        let aes_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Ok(Self {
            cipher: Aes256Gcm::new(aes_key),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionResult> {
        let nonce_bytes = super::generate_random_bytes(NONCE_LEN)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|e| {
            LedgerError::Encryption(format!("AES-256-GCM encryption failed: {e}"))
        })?;

        Ok(EncryptionResult {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Fails on a wrong key or any modification of the ciphertext
    pub fn decrypt(&self, ciphertext: &[u8], nonce_bytes: &[u8]) -> Result<Vec<u8>> {
        if nonce_bytes.len() != NONCE_LEN {
            return Err(LedgerError::Encryption(
                "AES-256-GCM requires a 12-byte nonce".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| LedgerError::Encryption("Payload could not be decrypted".to_string()))
    }
}

pub struct SecureMemory;

impl SecureMemory {
    /// Compare two byte strings without an early exit on the first mismatch
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }

        let mut result = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            result |= x ^ y;
        }
        result == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_key() {
        assert!(Aes256GcmCipher::new(SecureKey::new(vec![0u8; 16])).is_err());
        assert!(Aes256GcmCipher::new(SecureKey::new(vec![0u8; KEY_LEN])).is_ok());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = Aes256GcmCipher::new(SecureKey::new(vec![1u8; KEY_LEN])).unwrap();
        let plaintext = b"pre-signed transfer";

        let sealed = cipher.encrypt(plaintext).unwrap();
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_ne!(sealed.ciphertext.as_slice(), plaintext.as_slice());
        assert_eq!(
            cipher.decrypt(&sealed.ciphertext, &sealed.nonce).unwrap(),
            plaintext
        );
    }

    #[test]
    fn test_wrong_key_and_tampering_fail() {
        let cipher = Aes256GcmCipher::new(SecureKey::new(vec![1u8; KEY_LEN])).unwrap();
        let other = Aes256GcmCipher::new(SecureKey::new(vec![2u8; KEY_LEN])).unwrap();
        let mut sealed = cipher.encrypt(b"hello").unwrap();

        assert!(matches!(
            other.decrypt(&sealed.ciphertext, &sealed.nonce),
            Err(LedgerError::Encryption(_))
        ));

        sealed.ciphertext[0] ^= 0xff;
        assert!(cipher.decrypt(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn test_derived_key_depends_on_salt() {
        let kdf = KdfParams::fast();
        let a = SecureKey::derive(b"password", b"salt-one-16bytes", &kdf).unwrap();
        let b = SecureKey::derive(b"password", b"salt-two-16bytes", &kdf).unwrap();
        let again = SecureKey::derive(b"password", b"salt-one-16bytes", &kdf).unwrap();

        assert_eq!(a.len(), KEY_LEN);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes(), again.as_bytes());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(SecureMemory::constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!SecureMemory::constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!SecureMemory::constant_time_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SecureKey::new(vec![7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SecureKey { length: 32 }");
    }
}
