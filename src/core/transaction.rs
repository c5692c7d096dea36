// A transaction moves credit between two wallet addresses. Issuance
// transactions (credit purchases, mining rewards) have no sender and no
// signature; every other transaction is signed by the sender's Ed25519 key
// over its own hash.

use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, ed25519_verify, serialize, sha256_digest};
use crate::wallet::{public_key_from_address, validate_address, SigningKey};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata attached to a transaction (linked product, QR id, ...).
/// A BTreeMap so the hash does not depend on insertion order.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key carrying the QR transfer a transaction belongs to
pub const QR_ID_KEY: &str = "qr_id";

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    from_address: Option<String>, // None for system issuance
    to_address: String,
    amount: u64,
    timestamp: i64,
    data: Metadata,
    hash: String,
    signature: Option<Vec<u8>>,
}

impl Transaction {
    /// Create system issuance: credit entering circulation with no sender.
    pub fn new_issuance(to: &str, amount: u64, data: Metadata) -> Result<Transaction> {
        Self::check_amount(amount)?;
        Self::check_address("recipient", to)?;

        let mut tx = Transaction {
            from_address: None,
            to_address: to.to_string(),
            amount,
            timestamp: current_timestamp()?,
            data,
            hash: String::new(),
            signature: None,
        };
        tx.hash = tx.calculate_hash()?;
        Ok(tx)
    }

    /// Build an unsigned transfer. Balance checks live in the engine; this
    /// only enforces what can be checked from the fields alone.
    pub fn new_transfer(from: &str, to: &str, amount: u64, data: Metadata) -> Result<Transaction> {
        Self::check_amount(amount)?;
        Self::check_address("sender", from)?;
        Self::check_address("recipient", to)?;
        if from == to {
            return Err(LedgerError::Validation(
                "Sender and recipient must differ".to_string(),
            ));
        }

        let mut tx = Transaction {
            from_address: Some(from.to_string()),
            to_address: to.to_string(),
            amount,
            timestamp: current_timestamp()?,
            data,
            hash: String::new(),
            signature: None,
        };
        tx.hash = tx.calculate_hash()?;
        Ok(tx)
    }

    fn check_amount(amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn check_address(role: &str, address: &str) -> Result<()> {
        if !validate_address(address) {
            return Err(LedgerError::Validation(format!(
                "Invalid {role} address: {address}"
            )));
        }
        Ok(())
    }

    /// Sign with the sender's key. Signing on behalf of another wallet is refused.
    pub fn sign(&mut self, key: &SigningKey) -> Result<()> {
        let from = self.from_address.as_deref().ok_or_else(|| {
            LedgerError::Validation("Issuance transactions are not signed".to_string())
        })?;
        if key.address() != from {
            return Err(LedgerError::InvalidSignature(
                "Cannot sign transactions for other wallets".to_string(),
            ));
        }

        let signature = key.sign(&self.hash_bytes()?)?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Hash over every field except the hash and the signature
    pub fn calculate_hash(&self) -> Result<String> {
        let payload = serialize(&(
            &self.from_address,
            &self.to_address,
            self.amount,
            self.timestamp,
            &self.data,
        ))?;
        Ok(HEXLOWER.encode(&sha256_digest(&payload)))
    }

    /// Check the transaction on its own: positive amount, untampered hash,
    /// and a signature by the sender unless it is an issuance.
    pub fn verify(&self) -> Result<()> {
        Self::check_amount(self.amount)?;

        if self.calculate_hash()? != self.hash {
            return Err(LedgerError::InvalidSignature(format!(
                "Transaction {} does not match its contents",
                self.hash
            )));
        }

        let Some(from) = self.from_address.as_deref() else {
            return Ok(());
        };

        let signature = self.signature.as_deref().ok_or_else(|| {
            LedgerError::InvalidSignature(format!("Transaction {} is not signed", self.hash))
        })?;
        let public_key = public_key_from_address(from)
            .map_err(|_| LedgerError::InvalidSignature(format!("Bad sender address: {from}")))?;

        if !ed25519_verify(&public_key, signature, &self.hash_bytes()?) {
            return Err(LedgerError::InvalidSignature(format!(
                "Signature on transaction {} does not match the sender",
                self.hash
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        match self.verify() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Transaction failed verification: {e}");
                false
            }
        }
    }

    pub fn is_issuance(&self) -> bool {
        self.from_address.is_none()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn hash_bytes(&self) -> Result<Vec<u8>> {
        HEXLOWER
            .decode(self.hash.as_bytes())
            .map_err(|e| LedgerError::Validation(format!("Malformed transaction hash: {e}")))
    }

    pub fn get_from(&self) -> Option<&str> {
        self.from_address.as_deref()
    }

    pub fn get_to(&self) -> &str {
        self.to_address.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_data(&self) -> &Metadata {
        &self.data
    }

    pub fn get_signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn qr_id(&self) -> Option<&str> {
        self.data.get(QR_ID_KEY).map(String::as_str)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        crate::utils::deserialize(bytes)
    }

    /// Test hook: overwrite the amount without rehashing.
    #[cfg(test)]
    pub fn tamper_amount(&mut self, amount: u64) {
        self.amount = amount;
    }

    #[cfg(test)]
    pub fn tamper_signature(&mut self, signature: Option<Vec<u8>>) {
        self.signature = signature;
    }
}
