use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "credit-ledger", about = "Single-node credit ledger")]
pub struct Opt {
    #[arg(long, global = true, help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "create-wallet", about = "Create the wallet for an owner")]
    CreateWallet {
        #[arg(help = "Owner id (user or recipient group)")]
        owner_id: String,
        #[arg(help = "Passkey the wallet key is derived from")]
        passkey: String,
    },
    #[command(name = "issue", about = "Issue purchased credit to an address")]
    Issue {
        #[arg(help = "Recipient address")]
        to: String,
        #[arg(help = "Amount of credit")]
        amount: u64,
        #[arg(long, help = "Mine the issuance right away")]
        mine: bool,
    },
    #[command(name = "send", about = "Sign a transfer and queue it for verification")]
    Send {
        #[arg(help = "Sender address")]
        from: String,
        #[arg(help = "Recipient address")]
        to: String,
        #[arg(help = "Amount of credit")]
        amount: u64,
        #[arg(help = "Sender passkey")]
        passkey: String,
    },
    #[command(name = "verify", about = "Verify a pending transfer and seal it")]
    Verify {
        #[arg(help = "Transaction hash")]
        tx_hash: String,
        #[arg(help = "Recipient public key (hex)")]
        public_key: String,
    },
    #[command(name = "generate-qr", about = "Pre-sign a transfer into a QR payload")]
    GenerateQr {
        #[arg(help = "Sender address")]
        sender: String,
        #[arg(help = "Owner id of the recipient group")]
        recipient_group: String,
        #[arg(help = "Amount of credit")]
        amount: u64,
        #[arg(help = "Sender passkey")]
        passkey: String,
    },
    #[command(name = "scan-qr", about = "Decrypt and claim a QR payload")]
    ScanQr {
        #[arg(help = "QR payload")]
        payload: String,
        #[arg(help = "Receiver address")]
        receiver: String,
        #[arg(help = "Receiver passkey")]
        passkey: String,
    },
    #[command(name = "execute-qr", about = "Queue a scanned QR transfer")]
    ExecuteQr {
        #[arg(help = "QR id")]
        qr_id: String,
        #[arg(help = "Receiver address used at scan time")]
        receiver: String,
    },
    #[command(name = "verify-qr", about = "Verify an executed QR transfer and seal it")]
    VerifyQr {
        #[arg(help = "QR id")]
        qr_id: String,
        #[arg(help = "Counterparty public key (hex)")]
        public_key: String,
    },
    #[command(name = "get-qr", about = "Show a QR transfer")]
    GetQr {
        #[arg(help = "QR id")]
        qr_id: String,
    },
    #[command(name = "balance", about = "Confirmed and pending balance of an address")]
    Balance {
        #[arg(help = "Wallet address")]
        address: String,
    },
    #[command(name = "history", about = "Transactions touching an address")]
    History {
        #[arg(help = "Wallet address")]
        address: String,
    },
    #[command(name = "get-transaction", about = "Show a transaction record")]
    GetTransaction {
        #[arg(help = "Transaction hash")]
        tx_hash: String,
    },
    #[command(name = "chain-info", about = "Height, tip and chain statistics")]
    ChainInfo,
    #[command(name = "get-block", about = "Print one block")]
    GetBlock {
        #[arg(help = "Block index")]
        index: u64,
    },
    #[command(name = "validate", about = "Re-validate the whole chain")]
    Validate {
        #[arg(long, help = "Resume appends after a halt if the chain validates")]
        acknowledge: bool,
    },
    #[command(name = "mine", about = "Seal pending issuance into a block")]
    Mine,
}
