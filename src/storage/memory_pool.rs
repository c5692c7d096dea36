use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Pending transactions waiting for a block, in admission order.
///
/// Admission and sealing both run under the single pool lock, so two spends
/// from the same address can never both be admitted against the same balance.
pub struct MemoryPool {
    inner: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    order: Vec<String>,
    txs: HashMap<String, Transaction>,
}

impl PoolState {
    fn pending_outgoing(&self, address: &str) -> u64 {
        self.txs
            .values()
            .filter(|tx| tx.get_from() == Some(address))
            .map(Transaction::get_amount)
            .fold(0u64, u64::saturating_add)
    }

    fn pending_incoming(&self, address: &str) -> u64 {
        self.txs
            .values()
            .filter(|tx| tx.get_to() == address)
            .map(Transaction::get_amount)
            .fold(0u64, u64::saturating_add)
    }

    fn remove(&mut self, tx_hash: &str) -> Option<Transaction> {
        let removed = self.txs.remove(tx_hash);
        if removed.is_some() {
            self.order.retain(|h| h != tx_hash);
        }
        removed
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::LockPoisoned("memory pool".to_string()))
    }

    /// Admit a transaction if its sender can still cover it once every
    /// pending spend from the same address is subtracted. Incoming pending
    /// credit is not counted. `confirmed_balance` is evaluated under the pool
    /// lock.
    pub fn admit(
        &self,
        tx: Transaction,
        confirmed_balance: impl Fn(&str) -> Result<u64>,
    ) -> Result<()> {
        let mut pool = self.lock()?;

        if pool.txs.contains_key(tx.get_hash()) {
            return Err(LedgerError::Validation(format!(
                "Transaction {} is already pending",
                tx.get_hash()
            )));
        }

        if let Some(from) = tx.get_from() {
            let confirmed = confirmed_balance(from)?;
            let available = confirmed.saturating_sub(pool.pending_outgoing(from));
            if available < tx.get_amount() {
                log::warn!(
                    "Rejected pending transaction {}: needs {}, {} available",
                    tx.get_hash(),
                    tx.get_amount(),
                    available
                );
                return Err(LedgerError::InsufficientBalance {
                    required: tx.get_amount(),
                    available,
                });
            }
        }

        let hash = tx.get_hash().to_string();
        pool.order.push(hash.clone());
        pool.txs.insert(hash, tx);
        Ok(())
    }

    /// Run `append` while holding the pool lock and drop the sealed
    /// transactions only if it succeeds. Admissions wait until the block is
    /// on the chain, so no balance is ever counted twice or not at all.
    pub fn commit_sealed<R>(
        &self,
        sealed: &[String],
        append: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let mut pool = self.lock()?;
        let result = append()?;
        for hash in sealed {
            pool.remove(hash);
        }
        Ok(result)
    }

    pub fn get(&self, tx_hash: &str) -> Option<Transaction> {
        match self.inner.lock() {
            Ok(pool) => pool.txs.get(tx_hash).cloned(),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        match self.inner.lock() {
            Ok(pool) => pool.txs.contains_key(tx_hash),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                false
            }
        }
    }

    pub fn remove(&self, tx_hash: &str) -> Option<Transaction> {
        match self.inner.lock() {
            Ok(mut pool) => pool.remove(tx_hash),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                None
            }
        }
    }

    /// Pending transactions in admission order
    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.lock() {
            Ok(pool) => pool
                .order
                .iter()
                .filter_map(|hash| pool.txs.get(hash).cloned())
                .collect(),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn pending_outgoing(&self, address: &str) -> u64 {
        match self.inner.lock() {
            Ok(pool) => pool.pending_outgoing(address),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                0
            }
        }
    }

    pub fn pending_incoming(&self, address: &str) -> u64 {
        match self.inner.lock() {
            Ok(pool) => pool.pending_incoming(address),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(pool) => pool.txs.len(),
            Err(_) => {
                log::error!("Failed to acquire lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
