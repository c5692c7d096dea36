//! # Credit Ledger - Single-Node Credit Ledger
//!
//! An append-only, hash-chained ledger for moving prepaid credit between
//! wallets, with proof-of-work sealing and a QR handshake for in-person
//! transfers. When I come back to this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Ledger**: blocks linked by SHA-256, each mined to a difficulty target
//! - **Balances**: always a replay over sealed blocks, never a stored number
//! - **Wallets**: Ed25519 keys derived from (owner id, passkey) with Argon2id;
//!   the private key is never stored
//! - **Pending pool**: admission checks spends that are still waiting, so one
//!   address cannot double-spend inside a block
//! - **QR transfers**: generate, scan, execute, verify, each step a
//!   compare-and-swap on the transfer's status
//!
//! ## How I Organized My Code
//! - `core/`: blocks, transactions, proof-of-work, the ledger, the engine
//! - `wallet/`: key derivation, addresses, wallet records
//! - `qr/`: the QR envelope, status machine and protocol
//! - `storage/`: collaborator traits, memory and sled stores, the pool,
//!   the payload cipher
//! - `config/`: TOML + environment settings
//! - `utils/`: hashing, signing, encoding helpers
//! - `node.rs`: `CreditNode`, which wires everything together
//! - `cli/`: command-line parsing for `main.rs`
//!
//! ## Key Design Decisions I Made
//! - No global chain: a `CreditNode` owns its ledger and gets passed around
//! - A bad block halts writes until someone acknowledges it
//! - QR payloads carry a transfer signed at generation, not a private key
//! - Sled for storage, same as before, behind traits so tests run in memory

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod qr;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testkit;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, KdfParams, MiningPolicy};
pub use core::{
    Block, ChainInfo, Ledger, Metadata, ProofOfWork, Receipt, Transaction, TransactionEngine,
    TransactionRecord, TxStatus,
};
pub use error::{LedgerError, Result};
pub use node::{
    BalanceReport, ChainStats, CreditNode, QrExecuted, TransactionSubmitted, TransactionVerified,
    WalletCreated,
};
pub use qr::{GeneratedQr, QrProtocol, QrStatus, QrTransfer, QrVerification, ScannedQr};
pub use storage::{BlockStore, MemoryStore, QrStore, SledStore, TransactionStore, WalletStore};
pub use wallet::{derive_key_pair, validate_address, SigningKey, WalletRecord, WalletService};
