use crate::core::{ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use log::info;
use serde::{Deserialize, Serialize};

/// previousHash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    index: u64,
    timestamp: i64,
    transactions: Vec<Transaction>,
    previous_hash: String,
    nonce: u64,
    difficulty: u32,
    hash: String,
}

impl Block {
    /// Run proof-of-work over a new block. `should_abort` lets the caller
    /// cancel the search when a competing block lands first.
    pub fn mine(
        index: u64,
        previous_hash: &str,
        transactions: Vec<Transaction>,
        difficulty: u32,
        should_abort: &dyn Fn() -> bool,
    ) -> Result<Block> {
        let mut block = Block {
            index,
            timestamp: current_timestamp()?,
            transactions,
            previous_hash: previous_hash.to_string(),
            nonce: 0,
            difficulty,
            hash: String::new(),
        };

        info!(
            "Starting proof-of-work for block {index} with {} transactions (difficulty {difficulty})",
            block.transactions.len()
        );
        let pow = ProofOfWork::new_proof_of_work(&block)?;
        let (nonce, hash) = pow.run(should_abort)?;
        block.nonce = nonce;
        block.hash = hash;
        info!("Proof-of-work completed for block {index}: {}", block.hash);

        Ok(block)
    }

    /// Mine the block that extends `previous`
    pub fn mine_next(
        previous: &Block,
        transactions: Vec<Transaction>,
        difficulty: u32,
        should_abort: &dyn Fn() -> bool,
    ) -> Result<Block> {
        let index = previous.index.checked_add(1).ok_or_else(|| {
            LedgerError::ChainIntegrity("Block index overflow".to_string())
        })?;
        Self::mine(index, &previous.hash, transactions, difficulty, should_abort)
    }

    /// Index 0, sentinel previous hash, no transactions, mined to `difficulty`
    pub fn generate_genesis_block(difficulty: u32) -> Result<Block> {
        Self::mine(0, GENESIS_PREVIOUS_HASH, vec![], difficulty, &|| false)
    }

    pub fn calculate_hash(&self) -> Result<String> {
        let pow = ProofOfWork::new_proof_of_work(self)?;
        Ok(pow.hash_with_nonce(self.nonce))
    }

    pub fn has_valid_transactions(&self) -> bool {
        self.transactions.iter().all(Transaction::is_valid)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn contains_transaction(&self, tx_hash: &str) -> bool {
        self.transactions.iter().any(|tx| tx.get_hash() == tx_hash)
    }

    /// Test hook: edit fields in place without re-mining.
    #[cfg(test)]
    pub fn tamper(&mut self, f: impl FnOnce(&mut Vec<Transaction>, &mut String)) {
        f(&mut self.transactions, &mut self.previous_hash);
    }

    #[cfg(test)]
    pub fn set_hash(&mut self, hash: &str) {
        self.hash = hash.to_string();
    }
}
