//! The application context
//!
//! [`CreditNode`] owns one ledger and everything around it, and exposes the
//! operations a web layer or the CLI calls. There is no global chain: create
//! a node and pass it around.

use crate::config::Config;
use crate::core::{
    Block, ChainInfo, Ledger, Metadata, MinerHandle, Receipt, TransactionEngine,
    TransactionRecord, TxStatus,
};
use crate::error::{LedgerError, Result};
use crate::qr::{GeneratedQr, QrProtocol, QrTransfer, QrVerification, ScannedQr};
use crate::storage::{LedgerStore, MemoryStore, SledStore};
use crate::wallet::{validate_address, WalletService};
use data_encoding::HEXLOWER;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletCreated {
    pub owner_id: String,
    pub address: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSubmitted {
    pub tx_hash: String,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionVerified {
    pub verified: bool,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrExecuted {
    pub qr_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    #[serde(flatten)]
    pub chain: ChainInfo,
    pub pending_transactions: usize,
    pub mining_reward: u64,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub address: String,
    pub confirmed: u64,
    pub pending_inclusive: u64,
    /// Last value written to the wallet record, if there is one
    pub cached: Option<u64>,
}

pub struct CreditNode {
    config: Config,
    ledger: Arc<Ledger>,
    engine: Arc<TransactionEngine>,
    wallets: Arc<WalletService>,
    qr: QrProtocol,
}

impl CreditNode {
    /// Node backed by sled under `config.data_dir`
    pub fn open(config: Config) -> Result<CreditNode> {
        config.validate()?;
        let store = Arc::new(SledStore::open(&config.db_path())?);
        Self::with_store(config, store)
    }

    /// Node that forgets everything when dropped
    pub fn in_memory(config: Config) -> Result<CreditNode> {
        config.validate()?;
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store<S: LedgerStore + 'static>(config: Config, store: Arc<S>) -> Result<CreditNode> {
        let ledger = Arc::new(Ledger::open(store.clone(), config.difficulty)?);
        let engine = Arc::new(TransactionEngine::new(
            Arc::clone(&ledger),
            store.clone(),
            store.clone(),
            &config,
        )?);
        let wallets = Arc::new(WalletService::new(store.clone(), config.kdf));
        let qr = QrProtocol::new(
            Arc::clone(&engine),
            Arc::clone(&wallets),
            store,
            config.kdf,
            config.qr_ttl_secs,
        );

        info!(
            "Credit node ready (difficulty {}, reward {})",
            config.difficulty, config.mining_reward
        );
        Ok(CreditNode {
            config,
            ledger,
            engine,
            wallets,
            qr,
        })
    }

    pub fn create_wallet(&self, owner_id: &str, passkey: &str) -> Result<WalletCreated> {
        let record = self.wallets.create_wallet(owner_id, passkey)?;
        Ok(WalletCreated {
            owner_id: record.owner_id,
            address: record.address,
            public_key: HEXLOWER.encode(&record.public_key),
        })
    }

    /// Sign a transfer with the sender's passkey and queue it. It is sealed
    /// once the recipient side verifies it.
    pub fn create_transaction(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        passkey: &str,
    ) -> Result<TransactionSubmitted> {
        let (_, key) = self.wallets.unlock(from, passkey)?;
        let tx = self
            .engine
            .create_transaction(from, to, amount, &key, Metadata::new())?;
        let tx_hash = tx.get_hash().to_string();
        self.engine.add_pending(tx)?;
        Ok(TransactionSubmitted {
            tx_hash,
            status: TxStatus::Pending,
        })
    }

    pub fn verify_transaction(
        &self,
        tx_hash: &str,
        counterparty_public_key: &str,
    ) -> Result<TransactionVerified> {
        let key = decode_public_key(counterparty_public_key)?;
        let receipt = self.engine.verify_and_confirm(tx_hash, &key)?;
        Ok(TransactionVerified {
            verified: true,
            receipt,
        })
    }

    pub fn generate_qr(
        &self,
        sender_address: &str,
        recipient_group_id: &str,
        amount: u64,
        passkey: &str,
    ) -> Result<GeneratedQr> {
        self.qr
            .generate(sender_address, recipient_group_id, amount, passkey)
    }

    pub fn scan_qr(&self, payload: &str, receiver_address: &str, passkey: &str) -> Result<ScannedQr> {
        self.qr.scan(payload, receiver_address, passkey)
    }

    pub fn execute_qr(&self, qr_id: &str, receiver_address: &str) -> Result<QrExecuted> {
        let tx_hash = self.qr.execute(qr_id, receiver_address)?;
        Ok(QrExecuted {
            qr_id: qr_id.to_string(),
            tx_hash,
        })
    }

    pub fn verify_qr(&self, qr_id: &str, counterparty_public_key: &str) -> Result<QrVerification> {
        let key = decode_public_key(counterparty_public_key)?;
        self.qr.verify(qr_id, &key)
    }

    pub fn get_qr(&self, qr_id: &str) -> Result<QrTransfer> {
        self.qr.get(qr_id)
    }

    /// Credit purchased from outside the ledger. Sealed by the next mine.
    pub fn issue_credit(&self, to: &str, amount: u64) -> Result<TransactionSubmitted> {
        let tx = self.engine.issue(to, amount, Metadata::new())?;
        Ok(TransactionSubmitted {
            tx_hash: tx.get_hash().to_string(),
            status: TxStatus::Pending,
        })
    }

    pub fn mine(&self) -> Result<Option<Block>> {
        self.engine.mine_pending()
    }

    pub fn spawn_miner(&self, interval: Duration) -> MinerHandle {
        self.engine.spawn_miner(interval)
    }

    pub fn get_chain_info(&self) -> Result<ChainStats> {
        Ok(ChainStats {
            chain: self.ledger.chain_info()?,
            pending_transactions: self.engine.pending_count(),
            mining_reward: self.config.mining_reward,
            is_valid: self.ledger.is_valid(),
        })
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        self.ledger.get_block(index)
    }

    pub fn balance(&self, address: &str) -> Result<BalanceReport> {
        if !validate_address(address) {
            return Err(LedgerError::Validation(format!(
                "Invalid address: {address}"
            )));
        }
        let cached = match self.wallets.find_by_address(address) {
            Ok(wallet) => Some(wallet.cached_balance),
            Err(LedgerError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(BalanceReport {
            address: address.to_string(),
            confirmed: self.engine.balance_of(address)?,
            pending_inclusive: self.engine.pending_inclusive_balance(address)?,
            cached,
        })
    }

    pub fn get_transaction(&self, tx_hash: &str) -> Result<TransactionRecord> {
        self.engine.find_transaction(tx_hash)
    }

    pub fn history(&self, address: &str) -> Result<Vec<TransactionRecord>> {
        self.engine.history_of(address)
    }

    pub fn validate(&self) -> bool {
        self.ledger.is_valid()
    }

    pub fn acknowledge_integrity_failure(&self) -> Result<()> {
        self.ledger.acknowledge_integrity_failure()
    }

    pub fn get_ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn get_engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }
}

fn decode_public_key(hex: &str) -> Result<Vec<u8>> {
    HEXLOWER
        .decode(hex.trim().to_ascii_lowercase().as_bytes())
        .map_err(|_| LedgerError::Validation("Public key must be hex encoded".to_string()))
}
