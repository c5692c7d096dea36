// The ledger is the hash-chained list of sealed blocks. It is the only
// source of truth for balances: every balance is a replay over sealed blocks.
// Blocks are kept in memory behind a RwLock and written through to a
// BlockStore before they become visible.

use crate::core::{meets_difficulty, Block, ProofOfWork, Transaction, GENESIS_PREVIOUS_HASH};
use crate::error::{LedgerError, Result};
use crate::storage::BlockStore;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Summary of the chain for callers and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainInfo {
    pub height: u64,
    pub latest_hash: String,
    pub difficulty: u32,
    pub block_count: usize,
    pub halted: bool,
}

pub struct Ledger {
    blocks: RwLock<Vec<Block>>,
    difficulty: u32,
    store: Arc<dyn BlockStore>,
    // Bumped on every append; a miner working on an older tip gives up
    tip_generation: AtomicU64,
    halted: AtomicBool,
}

impl Ledger {
    /// Load the chain from `store`, or create and persist a genesis block
    /// when the store is empty. A loaded chain that fails validation is
    /// opened halted: reads work, appends are refused.
    pub fn open(store: Arc<dyn BlockStore>, difficulty: u32) -> Result<Ledger> {
        let mut blocks = store.load_blocks_ordered()?;

        if blocks.is_empty() {
            info!("No chain found, creating genesis block at difficulty {difficulty}");
            let genesis = Block::generate_genesis_block(difficulty)?;
            store.persist_block(&genesis)?;
            blocks.push(genesis);
        }

        for (position, block) in blocks.iter().enumerate() {
            if block.get_index() != position as u64 {
                return Err(LedgerError::ChainIntegrity(format!(
                    "Stored chain has a gap: found block {} at position {position}",
                    block.get_index()
                )));
            }
        }

        let halted = match validate_blocks(&blocks, difficulty) {
            Ok(()) => false,
            Err(e) => {
                error!("Stored chain failed validation, ledger is halted: {e}");
                true
            }
        };

        info!(
            "Ledger opened with {} blocks, tip {}",
            blocks.len(),
            blocks.last().map(Block::get_hash).unwrap_or_default()
        );

        Ok(Ledger {
            blocks: RwLock::new(blocks),
            difficulty,
            store,
            tip_generation: AtomicU64::new(0),
            halted: AtomicBool::new(halted),
        })
    }

    pub fn create_genesis_block(&self) -> Result<Block> {
        Block::generate_genesis_block(self.difficulty)
    }

    /// Mine a block on `previous` without touching the chain
    pub fn mine_block(
        transactions: Vec<Transaction>,
        previous: &Block,
        difficulty: u32,
        should_abort: &dyn Fn() -> bool,
    ) -> Result<Block> {
        Block::mine_next(previous, transactions, difficulty, should_abort)
    }

    /// Mine on the current tip. The search is abandoned with
    /// `ProofOfWorkAborted` as soon as another block is appended.
    pub fn mine_on_tip(&self, transactions: Vec<Transaction>) -> Result<Block> {
        if self.is_halted() {
            return Err(LedgerError::LedgerHalted);
        }
        let generation = self.tip_generation.load(Ordering::SeqCst);
        let tip = self.latest_block()?;

        let abort = || {
            self.tip_generation.load(Ordering::SeqCst) != generation || self.is_halted()
        };
        Self::mine_block(transactions, &tip, self.difficulty, &abort)
    }

    /// Validate `block` as the successor of the current tip, persist it and
    /// make it visible. Anything wrong with a block that claims to extend the
    /// tip halts the ledger; a block mined on an old tip is just stale.
    pub fn append_block(&self, block: Block) -> Result<()> {
        if self.is_halted() {
            return Err(LedgerError::LedgerHalted);
        }

        let mut blocks = self.blocks.write()?;
        let tip = blocks
            .last()
            .ok_or_else(|| LedgerError::ChainIntegrity("Chain has no genesis block".to_string()))?;

        if block.get_previous_hash() != tip.get_hash() && block.get_index() <= tip.get_index() {
            warn!(
                "Discarding stale block {} mined on an old tip",
                block.get_index()
            );
            return Err(LedgerError::ProofOfWorkAborted);
        }

        if let Err(e) = check_successor(&blocks, &block, self.difficulty) {
            error!("Rejected block {}: {e}. Halting ledger", block.get_index());
            self.halted.store(true, Ordering::SeqCst);
            return Err(e);
        }

        self.store.persist_block(&block)?;
        info!(
            "Appended block {} ({}) with {} transactions",
            block.get_index(),
            block.get_hash(),
            block.get_transactions().len()
        );
        blocks.push(block);
        self.tip_generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Full re-validation: hashes, linkage, difficulty and signatures.
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Chain validation failed: {e}");
                false
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let blocks = self.blocks.read()?;
        validate_blocks(&blocks, self.difficulty)
    }

    /// Confirmed balance: everything received minus everything sent, over
    /// sealed blocks only.
    pub fn balance_of(&self, address: &str) -> Result<u64> {
        let blocks = self.blocks.read()?;
        Ok(replay_balance(&blocks, address))
    }

    pub fn latest_block(&self) -> Result<Block> {
        self.blocks
            .read()?
            .last()
            .cloned()
            .ok_or_else(|| LedgerError::ChainIntegrity("Chain has no genesis block".to_string()))
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        let blocks = self.blocks.read()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| blocks.get(i))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Block {index}")))
    }

    pub fn get_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.blocks.read()?.clone())
    }

    pub fn chain_info(&self) -> Result<ChainInfo> {
        let blocks = self.blocks.read()?;
        let tip = blocks
            .last()
            .ok_or_else(|| LedgerError::ChainIntegrity("Chain has no genesis block".to_string()))?;
        Ok(ChainInfo {
            height: tip.get_index(),
            latest_hash: tip.get_hash().to_string(),
            difficulty: self.difficulty,
            block_count: blocks.len(),
            halted: self.is_halted(),
        })
    }

    /// Sealed transaction by hash, with the index of its block
    pub fn find_transaction(&self, tx_hash: &str) -> Result<Option<(Transaction, u64)>> {
        let blocks = self.blocks.read()?;
        for block in blocks.iter() {
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| tx.get_hash() == tx_hash)
            {
                return Ok(Some((tx.clone(), block.get_index())));
            }
        }
        Ok(None)
    }

    pub fn contains_transaction(&self, tx_hash: &str) -> Result<bool> {
        Ok(self.find_transaction(tx_hash)?.is_some())
    }

    /// Every sealed transaction touching `address`, oldest first
    pub fn history_of(&self, address: &str) -> Result<Vec<Transaction>> {
        let blocks = self.blocks.read()?;
        Ok(blocks
            .iter()
            .flat_map(Block::get_transactions)
            .filter(|tx| tx.get_to() == address || tx.get_from() == Some(address))
            .cloned()
            .collect())
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Operator acknowledgement after investigating an integrity failure.
    /// The chain must validate again before appends resume.
    pub fn acknowledge_integrity_failure(&self) -> Result<()> {
        self.validate()?;
        self.halted.store(false, Ordering::SeqCst);
        info!("Integrity failure acknowledged, ledger accepting blocks again");
        Ok(())
    }

    /// Test hook: rewrite a sealed block in place, bypassing validation.
    #[cfg(test)]
    pub fn tamper_block(&self, index: usize, f: impl FnOnce(&mut Block)) {
        let mut blocks = self.blocks.write().unwrap();
        f(&mut blocks[index]);
    }
}

fn replay_balance(blocks: &[Block], address: &str) -> u64 {
    let mut balance: i128 = 0;
    for tx in blocks.iter().flat_map(Block::get_transactions) {
        if tx.get_to() == address {
            balance += i128::from(tx.get_amount());
        }
        if tx.get_from() == Some(address) {
            balance -= i128::from(tx.get_amount());
        }
    }
    u64::try_from(balance.max(0)).unwrap_or(u64::MAX)
}

fn check_block(block: &Block, min_difficulty: u32) -> Result<()> {
    if block.get_difficulty() < min_difficulty {
        return Err(LedgerError::ChainIntegrity(format!(
            "Block {} has difficulty {} below the required {min_difficulty}",
            block.get_index(),
            block.get_difficulty()
        )));
    }
    if !meets_difficulty(block.get_hash(), block.get_difficulty()) || !ProofOfWork::validate(block)
    {
        return Err(LedgerError::ChainIntegrity(format!(
            "Block {} hash does not match its contents",
            block.get_index()
        )));
    }
    for tx in block.get_transactions() {
        tx.verify().map_err(|e| {
            LedgerError::ChainIntegrity(format!(
                "Block {} carries invalid transaction {}: {e}",
                block.get_index(),
                tx.get_hash()
            ))
        })?;
    }
    Ok(())
}

/// Linkage, proof-of-work and signatures, plus spending rules against the
/// chain so far: no transaction sealed twice, no sender overdrawn.
fn check_successor(chain: &[Block], block: &Block, min_difficulty: u32) -> Result<()> {
    let tip = chain
        .last()
        .ok_or_else(|| LedgerError::ChainIntegrity("Chain has no genesis block".to_string()))?;

    if block.get_previous_hash() != tip.get_hash() {
        return Err(LedgerError::ChainIntegrity(format!(
            "Block {} does not link to tip {}",
            block.get_index(),
            tip.get_hash()
        )));
    }
    if block.get_index() != tip.get_index() + 1 {
        return Err(LedgerError::ChainIntegrity(format!(
            "Block index {} does not follow {}",
            block.get_index(),
            tip.get_index()
        )));
    }
    check_block(block, min_difficulty)?;

    let sealed: HashSet<&str> = chain
        .iter()
        .flat_map(Block::get_transactions)
        .map(Transaction::get_hash)
        .collect();
    let mut seen = HashSet::new();
    let mut balances: HashMap<&str, u64> = HashMap::new();

    for tx in block.get_transactions() {
        if sealed.contains(tx.get_hash()) || !seen.insert(tx.get_hash()) {
            return Err(LedgerError::ChainIntegrity(format!(
                "Transaction {} is already sealed",
                tx.get_hash()
            )));
        }
        if let Some(from) = tx.get_from() {
            let balance = *balances
                .entry(from)
                .or_insert_with(|| replay_balance(chain, from));
            let remaining = balance.checked_sub(tx.get_amount()).ok_or_else(|| {
                LedgerError::ChainIntegrity(format!(
                    "Transaction {} overdraws {from}",
                    tx.get_hash()
                ))
            })?;
            balances.insert(from, remaining);
        }
        let to = tx.get_to();
        let credited = balances
            .get(to)
            .copied()
            .unwrap_or_else(|| replay_balance(chain, to))
            .saturating_add(tx.get_amount());
        balances.insert(to, credited);
    }
    Ok(())
}

fn validate_blocks(blocks: &[Block], min_difficulty: u32) -> Result<()> {
    let genesis = blocks
        .first()
        .ok_or_else(|| LedgerError::ChainIntegrity("Chain has no genesis block".to_string()))?;
    if genesis.get_index() != 0 || genesis.get_previous_hash() != GENESIS_PREVIOUS_HASH {
        return Err(LedgerError::ChainIntegrity(
            "First block is not a genesis block".to_string(),
        ));
    }
    check_block(genesis, min_difficulty)?;

    for i in 1..blocks.len() {
        check_successor(&blocks[..i], &blocks[i], min_difficulty)?;
    }
    Ok(())
}
