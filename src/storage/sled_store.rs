// Sled-backed persistence. Every collection gets its own tree inside one
// database, and records are stored bincode-encoded.

use crate::core::{Block, TransactionRecord, TxStatus};
use crate::error::{LedgerError, Result};
use crate::qr::{QrStatus, QrTransfer};
use crate::storage::{BlockStore, QrStore, TransactionStore, WalletStore};
use crate::utils::{deserialize, serialize};
use crate::wallet::WalletRecord;
use log::info;
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

const BLOCKS_TREE: &str = "blocks";
const WALLETS_TREE: &str = "wallets"; // owner id -> wallet
const WALLET_ADDRESSES_TREE: &str = "wallet_addresses"; // address -> owner id
const TRANSACTIONS_TREE: &str = "transactions";
const QR_TREE: &str = "qr_transfers";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    db_path: PathBuf,
    blocks: Tree,
    wallets: Tree,
    wallet_addresses: Tree,
    transactions: Tree,
    qr_transfers: Tree,
}

fn open_tree(db: &Db, name: &str) -> Result<Tree> {
    db.open_tree(name)
        .map_err(|e| LedgerError::Database(format!("Failed to open {name} tree: {e}")))
}

impl SledStore {
    pub fn open(path: &Path) -> Result<SledStore> {
        let db = sled::open(path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        info!("Opened ledger database at {}", path.display());

        Ok(SledStore {
            blocks: open_tree(&db, BLOCKS_TREE)?,
            wallets: open_tree(&db, WALLETS_TREE)?,
            wallet_addresses: open_tree(&db, WALLET_ADDRESSES_TREE)?,
            transactions: open_tree(&db, TRANSACTIONS_TREE)?,
            qr_transfers: open_tree(&db, QR_TREE)?,
            db,
            db_path: path.to_path_buf(),
        })
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockStore for SledStore {
    fn persist_block(&self, block: &Block) -> Result<()> {
        // Big-endian keys keep sled's byte order equal to chain order
        let key = block.get_index().to_be_bytes();
        self.blocks.insert(key, block.serialize()?)?;
        self.blocks.flush()?;
        Ok(())
    }

    fn load_blocks_ordered(&self) -> Result<Vec<Block>> {
        let mut blocks = vec![];
        for item in self.blocks.iter() {
            let (_, value) = item?;
            blocks.push(Block::deserialize(value.as_ref())?);
        }
        Ok(blocks)
    }
}

impl WalletStore for SledStore {
    fn resolve_wallet(&self, owner_id: &str) -> Result<Option<WalletRecord>> {
        match self.wallets.get(owner_id)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>> {
        let Some(owner) = self.wallet_addresses.get(address)? else {
            return Ok(None);
        };
        let owner_id = String::from_utf8(owner.to_vec())
            .map_err(|e| LedgerError::Database(format!("Invalid owner id for {address}: {e}")))?;
        self.resolve_wallet(&owner_id)
    }

    fn insert_wallet(&self, record: &WalletRecord) -> Result<()> {
        let bytes = serialize(record)?;
        let swapped = self.wallets.compare_and_swap(
            record.owner_id.as_bytes(),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        if swapped.is_err() {
            return Err(LedgerError::Validation(format!(
                "Owner {} already has a wallet",
                record.owner_id
            )));
        }
        self.wallet_addresses
            .insert(record.address.as_bytes(), record.owner_id.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn persist_wallet(&self, record: &WalletRecord) -> Result<()> {
        self.wallets
            .insert(record.owner_id.as_bytes(), serialize(record)?)?;
        self.wallet_addresses
            .insert(record.address.as_bytes(), record.owner_id.as_bytes())?;
        Ok(())
    }
}

impl TransactionStore for SledStore {
    fn persist_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.transactions
            .insert(record.transaction.get_hash(), serialize(record)?)?;
        Ok(())
    }

    fn find_transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRecord>> {
        match self.transactions.get(hash)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn transactions_for_address(&self, address: &str) -> Result<Vec<TransactionRecord>> {
        let mut records = vec![];
        for item in self.transactions.iter() {
            let (_, value) = item?;
            let record: TransactionRecord = deserialize(value.as_ref())?;
            if record.involves(address) {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.transaction.get_timestamp());
        Ok(records)
    }

    fn pending_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let mut records = vec![];
        for item in self.transactions.iter() {
            let (_, value) = item?;
            let record: TransactionRecord = deserialize(value.as_ref())?;
            if record.status == TxStatus::Pending {
                records.push(record);
            }
        }
        records.sort_by_key(|r| (r.transaction.get_timestamp(), r.updated_at));
        Ok(records)
    }
}

impl QrStore for SledStore {
    fn insert_qr(&self, record: &QrTransfer) -> Result<()> {
        let swapped = self.qr_transfers.compare_and_swap(
            record.qr_id.as_bytes(),
            None as Option<&[u8]>,
            Some(serialize(record)?),
        )?;
        if swapped.is_err() {
            return Err(LedgerError::Validation(format!(
                "QR transfer {} already exists",
                record.qr_id
            )));
        }
        Ok(())
    }

    fn find_qr(&self, qr_id: &str) -> Result<Option<QrTransfer>> {
        match self.qr_transfers.get(qr_id)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap_qr(&self, expected: QrStatus, updated: &QrTransfer) -> Result<()> {
        let current_bytes = self
            .qr_transfers
            .get(updated.qr_id.as_bytes())?
            .ok_or_else(|| LedgerError::NotFound(format!("QR transfer {}", updated.qr_id)))?;
        let current: QrTransfer = deserialize(current_bytes.as_ref())?;
        if current.status != expected {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {} is {}, expected {}",
                updated.qr_id, current.status, expected
            )));
        }

        // The byte-level swap fails if anyone wrote the record since the read above
        let swapped = self.qr_transfers.compare_and_swap(
            updated.qr_id.as_bytes(),
            Some(current_bytes),
            Some(serialize(updated)?),
        )?;
        if swapped.is_err() {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {} changed concurrently",
                updated.qr_id
            )));
        }
        Ok(())
    }
}
