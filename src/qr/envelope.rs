// What actually travels inside the QR code. The outer envelope is plain JSON
// carrying the qr id and the encryption parameters; the inner intent is
// AES-256-GCM encrypted under a key stretched from the qr id, so anyone who
// holds the payload can open it and nobody else can.

use crate::config::KdfParams;
use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::storage::encrypted::generate_random_bytes;
use crate::storage::{Aes256GcmCipher, SecureKey};
use crate::utils::sha256_concat;
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

pub const PAYLOAD_TYPE: &str = "blockchain_transaction";
pub const PAYLOAD_VERSION: u32 = 1;

const KEY_TAG: &[u8] = b"encryption_key";
const SALT_LEN: usize = 16;

/// The decrypted transfer intent. Carries the transfer already signed by
/// the sender, never the sender's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrIntent {
    pub qr_id: String,
    pub recipient_group_id: String,
    pub amount: u64,
    pub sender_address: String,
    pub sender_public_key: String,
    pub timestamp: i64,
    pub transaction: Transaction,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct QrEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub qr_id: String,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl std::fmt::Debug for QrEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrEnvelope")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("qr_id", &self.qr_id)
            .finish_non_exhaustive()
    }
}

fn payload_cipher(qr_id: &str, salt: &[u8], kdf: &KdfParams) -> Result<Aes256GcmCipher> {
    let password = sha256_concat(&[qr_id.as_bytes(), KEY_TAG]);
    Aes256GcmCipher::new(SecureKey::derive(&password, salt, kdf)?)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.as_bytes())
        .map_err(|_| LedgerError::Validation(format!("QR payload field {name} is not base64")))
}

impl QrEnvelope {
    pub fn seal(intent: &QrIntent, kdf: &KdfParams) -> Result<QrEnvelope> {
        let salt = generate_random_bytes(SALT_LEN)?;
        let cipher = payload_cipher(&intent.qr_id, &salt, kdf)?;
        let plaintext = serde_json::to_vec(intent)?;
        let sealed = cipher.encrypt(&plaintext)?;

        Ok(QrEnvelope {
            kind: PAYLOAD_TYPE.to_string(),
            version: PAYLOAD_VERSION,
            qr_id: intent.qr_id.clone(),
            salt: BASE64.encode(&salt),
            nonce: BASE64.encode(&sealed.nonce),
            ciphertext: BASE64.encode(&sealed.ciphertext),
        })
    }

    /// Decrypt with the outer qr id and check the inner one matches it
    pub fn open(&self, kdf: &KdfParams) -> Result<QrIntent> {
        let salt = decode_field("salt", &self.salt)?;
        let nonce = decode_field("nonce", &self.nonce)?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;

        let cipher = payload_cipher(&self.qr_id, &salt, kdf)?;
        let plaintext = cipher.decrypt(&ciphertext, &nonce)?;
        let intent: QrIntent = serde_json::from_slice(&plaintext)
            .map_err(|_| LedgerError::Validation("QR payload is malformed".to_string()))?;

        if intent.qr_id != self.qr_id {
            return Err(LedgerError::Validation(
                "QR payload integrity check failed".to_string(),
            ));
        }
        Ok(intent)
    }

    /// The string encoded into the QR image
    pub fn to_payload(&self) -> Result<String> {
        Ok(BASE64.encode(&serde_json::to_vec(self)?))
    }

    pub fn from_payload(payload: &str) -> Result<QrEnvelope> {
        let json = decode_field("payload", payload.trim())?;
        let envelope: QrEnvelope = serde_json::from_slice(&json)
            .map_err(|_| LedgerError::Validation("QR payload is malformed".to_string()))?;

        if envelope.kind != PAYLOAD_TYPE {
            return Err(LedgerError::Validation(format!(
                "Unsupported QR payload type: {}",
                envelope.kind
            )));
        }
        if envelope.version != PAYLOAD_VERSION {
            return Err(LedgerError::Validation(format!(
                "Unsupported QR payload version: {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
