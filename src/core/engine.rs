// The transaction engine sits between callers and the ledger. It builds and
// signs transfers, keeps the pending pool honest about balances, and decides
// when something gets mined:
//
// - signed transfers wait in the pool until the counterparty verifies them,
//   then get a block of their own
// - issuance (credit purchases) is sealed by batch mining
//
// Only one miner runs at a time, and verification takes the same lock, so
// picking what to seal and sealing it never interleave. Pending records are
// put back into the pool when the engine is built. Everything that reads balances goes through
// the ledger replay; cached balances on wallet records are refreshed after
// each block but never read back here.

use crate::config::{Config, MiningPolicy};
use crate::core::transaction::Metadata;
use crate::core::{Block, Ledger, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{MemoryPool, SecureMemory, TransactionStore, WalletStore};
use crate::utils::current_timestamp;
use crate::wallet::SigningKey;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of a submitted transaction. Failed is final.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "PENDING"),
            TxStatus::Confirmed => write!(f, "CONFIRMED"),
            TxStatus::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub status: TxStatus,
    pub block_index: Option<u64>,
    pub block_hash: Option<String>,
    pub failure: Option<String>,
    pub updated_at: i64,
}

impl TransactionRecord {
    pub fn pending(transaction: Transaction) -> Result<TransactionRecord> {
        Ok(TransactionRecord {
            transaction,
            status: TxStatus::Pending,
            block_index: None,
            block_hash: None,
            failure: None,
            updated_at: current_timestamp()?,
        })
    }

    pub fn involves(&self, address: &str) -> bool {
        self.transaction.get_to() == address || self.transaction.get_from() == Some(address)
    }
}

/// Proof that a transaction was sealed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub from_address: Option<String>,
    pub to_address: String,
    pub amount: u64,
    pub block_index: u64,
    pub block_hash: String,
    pub confirmed_at: i64,
}

impl Receipt {
    fn new(tx: &Transaction, block: &Block) -> Receipt {
        Receipt {
            tx_hash: tx.get_hash().to_string(),
            from_address: tx.get_from().map(str::to_string),
            to_address: tx.get_to().to_string(),
            amount: tx.get_amount(),
            block_index: block.get_index(),
            block_hash: block.get_hash().to_string(),
            confirmed_at: block.get_timestamp(),
        }
    }
}

pub struct TransactionEngine {
    ledger: Arc<Ledger>,
    pool: MemoryPool,
    transactions: Arc<dyn TransactionStore>,
    wallets: Arc<dyn WalletStore>,
    // Serializes mining and appends
    mining_lock: Mutex<()>,
    mining_reward: u64,
    reward_address: Option<String>,
    mining_policy: MiningPolicy,
}

impl TransactionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        transactions: Arc<dyn TransactionStore>,
        wallets: Arc<dyn WalletStore>,
        config: &Config,
    ) -> Result<TransactionEngine> {
        let engine = TransactionEngine {
            ledger,
            pool: MemoryPool::new(),
            transactions,
            wallets,
            mining_lock: Mutex::new(()),
            mining_reward: config.mining_reward,
            reward_address: config.reward_address.clone(),
            mining_policy: config.mining_policy,
        };
        engine.restore_pending()?;
        Ok(engine)
    }

    /// Refill the pool from records an earlier run left pending, oldest
    /// first. A record the chain already holds is confirmed instead; a spend
    /// that no longer fits the sender's balance is failed.
    fn restore_pending(&self) -> Result<()> {
        let records = self.transactions.pending_transactions()?;
        if records.is_empty() {
            return Ok(());
        }

        let mut restored = 0;
        for record in records {
            let tx_hash = record.transaction.get_hash().to_string();
            if let Some((_, index)) = self.ledger.find_transaction(&tx_hash)? {
                let block = self.ledger.get_block(index)?;
                self.mark_confirmed(&record.transaction, &block)?;
                continue;
            }

            match self
                .pool
                .admit(record.transaction.clone(), |address| self.ledger.balance_of(address))
            {
                Ok(()) => restored += 1,
                Err(e @ LedgerError::InsufficientBalance { .. }) => {
                    self.mark_failed(record, &format!("Dropped on restart: {e}"))?;
                }
                Err(e) => return Err(e),
            }
        }
        info!("Restored {restored} pending transactions to the pool");
        Ok(())
    }

    pub fn get_ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Build and sign a transfer. Checks the confirmed balance only; the
    /// pending-adjusted check happens on admission. Does not touch the pool.
    pub fn create_transaction(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        key: &SigningKey,
        metadata: Metadata,
    ) -> Result<Transaction> {
        let mut tx = Transaction::new_transfer(from, to, amount, metadata)?;

        let available = self.ledger.balance_of(from)?;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        tx.sign(key)?;
        Ok(tx)
    }

    /// Verify and admit a transaction, then record it as pending.
    pub fn add_pending(&self, tx: Transaction) -> Result<()> {
        if self.ledger.is_halted() {
            return Err(LedgerError::LedgerHalted);
        }
        tx.verify()?;
        if self.ledger.contains_transaction(tx.get_hash())? {
            return Err(LedgerError::Validation(format!(
                "Transaction {} is already sealed",
                tx.get_hash()
            )));
        }
        if let Some(existing) = self.transactions.find_transaction_by_hash(tx.get_hash())? {
            if existing.status == TxStatus::Failed {
                return Err(LedgerError::StateTransition(format!(
                    "Transaction {} failed and is not retried",
                    tx.get_hash()
                )));
            }
        }

        let record = TransactionRecord::pending(tx.clone())?;
        self.pool
            .admit(tx, |address| self.ledger.balance_of(address))?;

        if let Err(e) = self.transactions.persist_transaction(&record) {
            self.pool.remove(record.transaction.get_hash());
            return Err(e);
        }
        info!(
            "Transaction {} pending: {} -> {} ({})",
            record.transaction.get_hash(),
            record.transaction.get_from().unwrap_or("issuance"),
            record.transaction.get_to(),
            record.transaction.get_amount()
        );
        Ok(())
    }

    /// Queue new credit for `to`. Sealed by the next batch mine.
    pub fn issue(&self, to: &str, amount: u64, metadata: Metadata) -> Result<Transaction> {
        let tx = Transaction::new_issuance(to, amount, metadata)?;
        self.add_pending(tx.clone())?;
        Ok(tx)
    }

    /// Authoritative balance from sealed blocks
    pub fn balance_of(&self, address: &str) -> Result<u64> {
        self.ledger.balance_of(address)
    }

    /// Confirmed balance adjusted by what is waiting in the pool
    pub fn pending_inclusive_balance(&self, address: &str) -> Result<u64> {
        let confirmed = self.ledger.balance_of(address)?;
        Ok(confirmed
            .saturating_sub(self.pool.pending_outgoing(address))
            .saturating_add(self.pool.pending_incoming(address)))
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.get_all()
    }

    pub fn pending_count(&self) -> usize {
        self.pool.len()
    }

    pub fn find_transaction(&self, tx_hash: &str) -> Result<TransactionRecord> {
        self.transactions
            .find_transaction_by_hash(tx_hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {tx_hash}")))
    }

    pub fn history_of(&self, address: &str) -> Result<Vec<TransactionRecord>> {
        self.transactions.transactions_for_address(address)
    }

    /// Re-check the signature and the recipient's key, then seal the
    /// transaction in a block of its own. Either check failing marks the
    /// transaction failed for good.
    pub fn verify_and_confirm(&self, tx_hash: &str, counterparty_key: &[u8]) -> Result<Receipt> {
        let mining = self.mining_lock.lock()?;
        let record = self.find_transaction(tx_hash)?;
        match record.status {
            TxStatus::Pending => {}
            TxStatus::Confirmed => {
                return Err(LedgerError::StateTransition(format!(
                    "Transaction {tx_hash} is already confirmed"
                )))
            }
            TxStatus::Failed => {
                return Err(LedgerError::StateTransition(format!(
                    "Transaction {tx_hash} failed and is not retried"
                )))
            }
        }
        if self.ledger.contains_transaction(tx_hash)? {
            return Err(LedgerError::StateTransition(format!(
                "Transaction {tx_hash} is already sealed"
            )));
        }
        let tx = record.transaction.clone();

        if let Err(e) = tx.verify() {
            self.mark_failed(record, &e.to_string())?;
            return Err(match e {
                LedgerError::InvalidSignature(msg) => LedgerError::InvalidSignature(msg),
                other => LedgerError::InvalidSignature(other.to_string()),
            });
        }

        let recipient_key = self
            .wallets
            .find_wallet_by_address(tx.get_to())?
            .map(|wallet| wallet.public_key);
        let matches = recipient_key
            .as_deref()
            .is_some_and(|key| SecureMemory::constant_time_eq(key, counterparty_key));
        if !matches {
            let reason = format!("Recipient {} does not hold the given key", tx.get_to());
            self.mark_failed(record, &reason)?;
            return Err(LedgerError::CounterpartyMismatch(reason));
        }

        // The pool is in-memory, so after a restart the record can outlive it
        if !self.pool.contains(tx_hash) {
            debug!("Re-admitting {tx_hash} to the pool before sealing");
            self.pool
                .admit(tx.clone(), |address| self.ledger.balance_of(address))?;
        }

        let block = self.seal(&mining, vec![tx.clone()])?;
        Ok(Receipt::new(&tx, &block))
    }

    /// Withdraw a transaction that is still pending and fail it
    pub fn cancel_pending(&self, tx_hash: &str, reason: &str) -> Result<()> {
        let record = self.find_transaction(tx_hash)?;
        if record.status != TxStatus::Pending {
            return Err(LedgerError::StateTransition(format!(
                "Transaction {tx_hash} is {}, not pending",
                record.status
            )));
        }
        self.mark_failed(record, reason)
    }

    fn mark_failed(&self, mut record: TransactionRecord, reason: &str) -> Result<()> {
        warn!(
            "Transaction {} failed verification: {reason}",
            record.transaction.get_hash()
        );
        self.pool.remove(record.transaction.get_hash());
        record.status = TxStatus::Failed;
        record.failure = Some(reason.to_string());
        record.updated_at = current_timestamp()?;
        self.transactions.persist_transaction(&record)
    }

    /// Batch-mine pending issuance. Returns None when the policy says there
    /// is nothing worth a block.
    pub fn mine_pending(&self) -> Result<Option<Block>> {
        let mining = self.mining_lock.lock()?;
        let batch = self.unsealed(
            self.pool
                .get_all()
                .into_iter()
                .filter(Transaction::is_issuance)
                .collect(),
        )?;

        if batch.is_empty() && self.mining_policy == MiningPolicy::RequirePending {
            debug!("Nothing pending to mine");
            return Ok(None);
        }
        self.seal(&mining, batch).map(Some)
    }

    // Drops anything a block already holds, along with its pool entry
    fn unsealed(&self, transactions: Vec<Transaction>) -> Result<Vec<Transaction>> {
        let mut fresh = Vec::with_capacity(transactions.len());
        for tx in transactions {
            if self.ledger.contains_transaction(tx.get_hash())? {
                debug!("Skipping {}: already sealed", tx.get_hash());
                self.pool.remove(tx.get_hash());
            } else {
                fresh.push(tx);
            }
        }
        Ok(fresh)
    }

    /// Mine `transactions` (plus the reward, if configured) onto the tip and
    /// append the block. An aborted search or a stale result is retried.
    /// Callers hold the mining lock.
    fn seal(&self, _mining: &MutexGuard<'_, ()>, transactions: Vec<Transaction>) -> Result<Block> {
        let hashes: Vec<String> = transactions
            .iter()
            .map(|tx| tx.get_hash().to_string())
            .collect();

        let block = loop {
            let mut batch = transactions.clone();
            if let Some(reward) = self.reward_transaction()? {
                batch.push(reward);
            }

            let block = match self.ledger.mine_on_tip(batch) {
                Ok(block) => block,
                Err(e) if e.is_recoverable() => {
                    warn!("Mining aborted, retrying on the new tip");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self
                .pool
                .commit_sealed(&hashes, || self.ledger.append_block(block.clone()))
            {
                Ok(()) => break block,
                Err(e) if e.is_recoverable() => {
                    warn!("Mined block went stale, retrying on the new tip");
                }
                Err(e) => return Err(e),
            }
        };

        for tx in block.get_transactions() {
            self.mark_confirmed(tx, &block)?;
        }
        self.refresh_cached_balances(&block);
        Ok(block)
    }

    fn reward_transaction(&self) -> Result<Option<Transaction>> {
        match &self.reward_address {
            Some(address) if self.mining_reward > 0 => {
                let mut data = Metadata::new();
                data.insert("kind".to_string(), "mining_reward".to_string());
                Ok(Some(Transaction::new_issuance(
                    address,
                    self.mining_reward,
                    data,
                )?))
            }
            _ => Ok(None),
        }
    }

    fn mark_confirmed(&self, tx: &Transaction, block: &Block) -> Result<()> {
        let mut record = match self.transactions.find_transaction_by_hash(tx.get_hash())? {
            Some(record) => record,
            None => TransactionRecord::pending(tx.clone())?,
        };
        record.status = TxStatus::Confirmed;
        record.block_index = Some(block.get_index());
        record.block_hash = Some(block.get_hash().to_string());
        record.updated_at = current_timestamp()?;
        self.transactions.persist_transaction(&record)
    }

    // Advisory only. A failure here never undoes the block.
    fn refresh_cached_balances(&self, block: &Block) {
        let mut touched: Vec<&str> = vec![];
        for tx in block.get_transactions() {
            touched.push(tx.get_to());
            if let Some(from) = tx.get_from() {
                touched.push(from);
            }
        }
        touched.sort_unstable();
        touched.dedup();

        for address in touched {
            let refreshed = self.wallets.find_wallet_by_address(address).and_then(|wallet| {
                let Some(mut wallet) = wallet else {
                    return Ok(());
                };
                wallet.cached_balance = self.ledger.balance_of(address)?;
                self.wallets.persist_wallet(&wallet)
            });
            if let Err(e) = refreshed {
                warn!("Could not refresh cached balance for {address}: {e}");
            }
        }
    }

    /// Run batch mining on a background thread every `interval` until the
    /// handle is stopped.
    pub fn spawn_miner(self: &Arc<Self>, interval: Duration) -> MinerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let engine = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            info!("Background miner started");
            while !stop_flag.load(Ordering::SeqCst) {
                match engine.mine_pending() {
                    Ok(Some(block)) => info!("Background miner sealed block {}", block.get_index()),
                    Ok(None) => {}
                    Err(LedgerError::LedgerHalted) => {
                        error!("Ledger halted, background miner stopping");
                        break;
                    }
                    Err(e) => error!("Background mining failed: {e}"),
                }
                thread::park_timeout(interval);
            }
            info!("Background miner stopped");
        });

        MinerHandle {
            stop,
            handle: Some(handle),
        }
    }
}

pub struct MinerHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MinerHandle {
    /// Signal the miner and wait for it to finish its current block
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("Background miner panicked");
            }
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
