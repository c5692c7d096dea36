//! Data storage and persistence
//!
//! The ledger core does not own a database. It talks to these collaborator
//! traits, and the node picks an implementation:
//!
//! - [`MemoryStore`]: everything in RwLock'd maps, for tests and throwaway nodes
//! - [`SledStore`]: the embedded sled database, one tree per collection
//!
//! The pending pool and the QR payload cipher live here as well.

pub mod encrypted;
pub mod memory_pool;
pub mod memory_store;
pub mod sled_store;

pub use encrypted::{Aes256GcmCipher, EncryptionResult, SecureKey, SecureMemory};
pub use memory_pool::MemoryPool;
pub use memory_store::MemoryStore;
pub use sled_store::SledStore;

use crate::core::{Block, TransactionRecord};
use crate::error::Result;
use crate::qr::{QrStatus, QrTransfer};
use crate::wallet::WalletRecord;

/// Durable block storage, replayed in index order on startup
pub trait BlockStore: Send + Sync {
    fn persist_block(&self, block: &Block) -> Result<()>;
    fn load_blocks_ordered(&self) -> Result<Vec<Block>>;
}

/// Identity-to-wallet mapping owned by account management
pub trait WalletStore: Send + Sync {
    fn resolve_wallet(&self, owner_id: &str) -> Result<Option<WalletRecord>>;
    fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>>;
    /// Insert a new wallet; fails with `Validation` if the owner already has one
    fn insert_wallet(&self, record: &WalletRecord) -> Result<()>;
    /// Upsert an existing wallet (advisory balance refresh)
    fn persist_wallet(&self, record: &WalletRecord) -> Result<()>;
}

pub trait TransactionStore: Send + Sync {
    fn persist_transaction(&self, record: &TransactionRecord) -> Result<()>;
    fn find_transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRecord>>;
    fn transactions_for_address(&self, address: &str) -> Result<Vec<TransactionRecord>>;
    /// Every record still `Pending`, oldest first
    fn pending_transactions(&self) -> Result<Vec<TransactionRecord>>;
}

pub trait QrStore: Send + Sync {
    /// Insert a new transfer; fails with `Validation` if the id is taken
    fn insert_qr(&self, record: &QrTransfer) -> Result<()>;
    fn find_qr(&self, qr_id: &str) -> Result<Option<QrTransfer>>;
    /// Optimistic check-then-set: replace the stored record only if its
    /// status is still `expected`, otherwise fail with `StateTransition`.
    fn compare_and_swap_qr(&self, expected: QrStatus, updated: &QrTransfer) -> Result<()>;
}

/// A backend that can serve every collection the node needs
pub trait LedgerStore: BlockStore + WalletStore + TransactionStore + QrStore {}

impl<T: BlockStore + WalletStore + TransactionStore + QrStore> LedgerStore for T {}
