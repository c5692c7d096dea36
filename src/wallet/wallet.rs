// Deterministic wallet keys. The same (owner id, passkey) pair always yields
// the same Ed25519 key pair, so the private key never has to be stored: it is
// re-derived whenever a signature is needed.

use crate::config::KdfParams;
use crate::error::{LedgerError, Result};
use crate::utils::{
    base58_decode, base58_encode, ed25519_public_key, ed25519_sign, sha256_concat,
    sha256_digest, ED25519_PUBLIC_KEY_LEN,
};
use argon2::{Algorithm, Argon2, Params, Version};
use data_encoding::HEXLOWER;
use zeroize::{ZeroizeOnDrop, Zeroizing};

const VERSION: u8 = 0x1c;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

const SALT_TAG: &[u8] = b"credit-ledger/wallet-salt/v1";
const PRIVATE_TAG: &[u8] = b"private";
const COMMITMENT_TAG: &[u8] = b"commitment";

/// Signing material for one wallet. The seed is wiped on drop and never
/// printed by `Debug`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKey {
    seed: Vec<u8>,
    public_key: Vec<u8>,
    address: String,
}

impl SigningKey {
    pub fn from_seed(seed: &[u8]) -> Result<SigningKey> {
        let public_key = ed25519_public_key(seed)?;
        let address = address_from_public_key(&public_key);
        Ok(SigningKey {
            seed: seed.to_vec(),
            public_key,
            address,
        })
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        ed25519_sign(&self.seed, message)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        HEXLOWER.encode(&self.public_key)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &self.address)
            .finish()
    }
}

/// Everything derived from (owner id, passkey)
pub struct DerivedKeys {
    pub signing_key: SigningKey,
    /// Stored with the wallet record to check passkeys later
    pub passkey_commitment: String,
}

/// Derive the wallet key pair and passkey commitment.
///
/// The passkey is hashed, then stretched with Argon2id under a salt bound to
/// the owner id. Two different tags split the stretched secret into the
/// signing seed and the commitment, so the commitment reveals nothing about
/// the seed.
pub fn derive_key_pair(owner_id: &str, passkey: &str, kdf: &KdfParams) -> Result<DerivedKeys> {
    if owner_id.is_empty() {
        return Err(LedgerError::Validation("Owner id is required".to_string()));
    }
    if passkey.is_empty() {
        return Err(LedgerError::Validation("Passkey is required".to_string()));
    }

    let passkey_hash = Zeroizing::new(sha256_digest(passkey.as_bytes()));
    let salt = sha256_concat(&[SALT_TAG, owner_id.as_bytes()]);
    let stretched = stretch(&passkey_hash, &salt, kdf)?;

    let seed = Zeroizing::new(sha256_concat(&[stretched.as_slice(), PRIVATE_TAG]));
    let commitment = sha256_concat(&[stretched.as_slice(), COMMITMENT_TAG]);

    Ok(DerivedKeys {
        signing_key: SigningKey::from_seed(&seed)?,
        passkey_commitment: HEXLOWER.encode(&commitment),
    })
}

/// Argon2id into a 32-byte buffer that is wiped on drop
pub fn stretch(secret: &[u8], salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<Vec<u8>>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| LedgerError::Crypto(format!("Invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new(vec![0u8; 32]);
    argon2
        .hash_password_into(secret, salt, &mut out)
        .map_err(|e| LedgerError::Crypto(format!("Key derivation failed: {e}")))?;
    Ok(out)
}

/// version + public key + checksum, base58
pub fn address_from_public_key(public_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![];
    payload.push(VERSION);
    payload.extend(public_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

pub fn public_key_from_address(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(LedgerError::Validation(format!(
            "Invalid address: {address}"
        )));
    }
    let payload = base58_decode(address)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    if payload.len() != 1 + ED25519_PUBLIC_KEY_LEN + ADDRESS_CHECK_SUM_LEN {
        return false;
    }
    if payload[0] != VERSION {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body) == actual_checksum
}
