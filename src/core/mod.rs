//! Ledger core
//!
//! Blocks, transactions and proof-of-work, the hash-chained [`Ledger`] and the
//! [`TransactionEngine`] that feeds it.

pub mod block;
pub mod engine;
pub mod ledger;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, GENESIS_PREVIOUS_HASH};
pub use engine::{MinerHandle, Receipt, TransactionEngine, TransactionRecord, TxStatus};
pub use ledger::{ChainInfo, Ledger};
pub use proof_of_work::{meets_difficulty, ProofOfWork};
pub use transaction::{Metadata, Transaction, QR_ID_KEY};
