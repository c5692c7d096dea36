//! Error handling for the credit ledger
//!
//! Every fallible operation in the crate returns [`LedgerError`]. The variants
//! mirror the failure taxonomy the web layer needs to tell apart, so callers
//! can match on the case instead of parsing messages.
//!
//! Messages never carry private keys, passkeys, passkey commitments or
//! ciphertext.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Bad amount, missing field, malformed address. Caller's fault, never retried.
    Validation(String),
    /// Sender cannot cover the transfer (pending spends included)
    InsufficientBalance { required: u64, available: u64 },
    /// Signature missing or not produced by the sender's key
    InvalidSignature(String),
    /// Wallet exists but the passkey does not open it
    InvalidPasskey,
    /// Tampering or a bug: linkage, hash or proof-of-work check failed
    ChainIntegrity(String),
    /// Writes refused until an integrity failure has been investigated
    LedgerHalted,
    /// Unknown address, block, transaction or QR id
    NotFound(String),
    /// QR or transaction status sequence violated
    StateTransition(String),
    /// Mining cancelled because another block extended the chain first
    ProofOfWorkAborted,
    /// Receiver or counterparty key does not match the recorded party
    CounterpartyMismatch(String),
    /// Storage backend errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Key derivation or signing errors
    Crypto(String),
    /// Payload encryption/decryption errors
    Encryption(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// A lock holder panicked
    LockPoisoned(String),
}

impl LedgerError {
    /// Only an aborted proof-of-work is retried locally; everything else goes
    /// back to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LedgerError::ProofOfWorkAborted)
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Validation(msg) => write!(f, "Validation error: {msg}"),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient balance: required {required}, available {available}"
                )
            }
            LedgerError::InvalidSignature(msg) => write!(f, "Invalid signature: {msg}"),
            LedgerError::InvalidPasskey => write!(f, "Invalid passkey"),
            LedgerError::ChainIntegrity(msg) => write!(f, "Chain integrity error: {msg}"),
            LedgerError::LedgerHalted => write!(
                f,
                "Ledger halted after an integrity failure; writes are disabled"
            ),
            LedgerError::NotFound(what) => write!(f, "Not found: {what}"),
            LedgerError::StateTransition(msg) => write!(f, "Invalid state transition: {msg}"),
            LedgerError::ProofOfWorkAborted => {
                write!(f, "Proof-of-work aborted: chain tip moved during mining")
            }
            LedgerError::CounterpartyMismatch(msg) => write!(f, "Counterparty mismatch: {msg}"),
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            LedgerError::Encryption(msg) => write!(f, "Encryption error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::LockPoisoned(what) => write!(f, "Lock poisoned: {what}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        LedgerError::LockPoisoned(err.to_string())
    }
}
