use crate::core::{Block, TransactionRecord, TxStatus};
use crate::error::{LedgerError, Result};
use crate::qr::{QrStatus, QrTransfer};
use crate::storage::{BlockStore, QrStore, TransactionStore, WalletStore};
use crate::wallet::WalletRecord;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Non-durable store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
    wallets: RwLock<HashMap<String, WalletRecord>>,
    wallet_addresses: RwLock<HashMap<String, String>>,
    transactions: RwLock<HashMap<String, TransactionRecord>>,
    qr_transfers: RwLock<HashMap<String, QrTransfer>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl BlockStore for MemoryStore {
    fn persist_block(&self, block: &Block) -> Result<()> {
        self.blocks
            .write()?
            .insert(block.get_index(), block.clone());
        Ok(())
    }

    fn load_blocks_ordered(&self) -> Result<Vec<Block>> {
        Ok(self.blocks.read()?.values().cloned().collect())
    }
}

impl WalletStore for MemoryStore {
    fn resolve_wallet(&self, owner_id: &str) -> Result<Option<WalletRecord>> {
        Ok(self.wallets.read()?.get(owner_id).cloned())
    }

    fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>> {
        let owner = self.wallet_addresses.read()?.get(address).cloned();
        match owner {
            Some(owner_id) => self.resolve_wallet(&owner_id),
            None => Ok(None),
        }
    }

    fn insert_wallet(&self, record: &WalletRecord) -> Result<()> {
        let mut wallets = self.wallets.write()?;
        if wallets.contains_key(&record.owner_id) {
            return Err(LedgerError::Validation(format!(
                "Owner {} already has a wallet",
                record.owner_id
            )));
        }
        wallets.insert(record.owner_id.clone(), record.clone());
        self.wallet_addresses
            .write()?
            .insert(record.address.clone(), record.owner_id.clone());
        Ok(())
    }

    fn persist_wallet(&self, record: &WalletRecord) -> Result<()> {
        self.wallets
            .write()?
            .insert(record.owner_id.clone(), record.clone());
        self.wallet_addresses
            .write()?
            .insert(record.address.clone(), record.owner_id.clone());
        Ok(())
    }
}

impl TransactionStore for MemoryStore {
    fn persist_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.transactions
            .write()?
            .insert(record.transaction.get_hash().to_string(), record.clone());
        Ok(())
    }

    fn find_transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRecord>> {
        Ok(self.transactions.read()?.get(hash).cloned())
    }

    fn transactions_for_address(&self, address: &str) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = self
            .transactions
            .read()?
            .values()
            .filter(|r| r.involves(address))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.transaction.get_timestamp());
        Ok(records)
    }

    fn pending_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = self
            .transactions
            .read()?
            .values()
            .filter(|r| r.status == TxStatus::Pending)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.transaction.get_timestamp(), r.updated_at));
        Ok(records)
    }
}

impl QrStore for MemoryStore {
    fn insert_qr(&self, record: &QrTransfer) -> Result<()> {
        let mut transfers = self.qr_transfers.write()?;
        if transfers.contains_key(&record.qr_id) {
            return Err(LedgerError::Validation(format!(
                "QR transfer {} already exists",
                record.qr_id
            )));
        }
        transfers.insert(record.qr_id.clone(), record.clone());
        Ok(())
    }

    fn find_qr(&self, qr_id: &str) -> Result<Option<QrTransfer>> {
        Ok(self.qr_transfers.read()?.get(qr_id).cloned())
    }

    fn compare_and_swap_qr(&self, expected: QrStatus, updated: &QrTransfer) -> Result<()> {
        let mut transfers = self.qr_transfers.write()?;
        let current = transfers
            .get_mut(&updated.qr_id)
            .ok_or_else(|| LedgerError::NotFound(format!("QR transfer {}", updated.qr_id)))?;
        if current.status != expected {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {} is {}, expected {}",
                updated.qr_id, current.status, expected
            )));
        }
        *current = updated.clone();
        Ok(())
    }
}
