// Shared fixtures for unit tests

use crate::config::Config;
use crate::core::{Block, Metadata, Transaction};
use crate::node::{CreditNode, WalletCreated};
use crate::qr::{QrEnvelope, QrIntent, QrTransfer, PAYLOAD_TYPE, PAYLOAD_VERSION};
use crate::storage::WalletStore;
use crate::utils::sha256_digest;
use crate::wallet::{SigningKey, WalletRecord};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Deterministic key without paying for Argon2
pub fn test_key(name: &str) -> SigningKey {
    SigningKey::from_seed(&sha256_digest(name.as_bytes())).unwrap()
}

/// Signed transfer with unique metadata, so two calls never share a hash
pub fn signed_transfer(from: &SigningKey, to: &SigningKey, amount: u64) -> Transaction {
    let mut data = Metadata::new();
    data.insert(
        "seq".to_string(),
        SEQUENCE.fetch_add(1, Ordering::SeqCst).to_string(),
    );
    let mut tx = Transaction::new_transfer(from.address(), to.address(), amount, data).unwrap();
    tx.sign(from).unwrap();
    tx
}

/// Store a wallet record for a test key (no passkey will open it)
pub fn register_key(store: &dyn WalletStore, owner_id: &str, key: &SigningKey) {
    let mut record = sample_wallet_record(owner_id);
    record.address = key.address().to_string();
    record.public_key = key.public_key().to_vec();
    store.insert_wallet(&record).unwrap();
}

pub fn sample_wallet_record(owner_id: &str) -> WalletRecord {
    let key = test_key(owner_id);
    WalletRecord {
        owner_id: owner_id.to_string(),
        address: key.address().to_string(),
        public_key: key.public_key().to_vec(),
        passkey_commitment: "00".repeat(32),
        cached_balance: 0,
        created_at: 0,
    }
}

pub fn sample_intent(
    qr_id: &str,
    sender: &SigningKey,
    recipient: &SigningKey,
    amount: u64,
) -> QrIntent {
    let transaction = signed_transfer(sender, recipient, amount);
    QrIntent {
        qr_id: qr_id.to_string(),
        recipient_group_id: "group-1".to_string(),
        amount,
        sender_address: sender.address().to_string(),
        sender_public_key: sender.public_key_hex(),
        timestamp: transaction.get_timestamp(),
        transaction,
    }
}

/// A GENERATED transfer with a placeholder envelope
pub fn sample_qr_transfer() -> QrTransfer {
    let intent = sample_intent("qr-test", &test_key("alice"), &test_key("bob"), 20);
    let envelope = QrEnvelope {
        kind: PAYLOAD_TYPE.to_string(),
        version: PAYLOAD_VERSION,
        qr_id: intent.qr_id.clone(),
        salt: String::new(),
        nonce: String::new(),
        ciphertext: String::new(),
    };
    QrTransfer::new(&intent, envelope)
}

pub fn test_node() -> CreditNode {
    CreditNode::in_memory(Config::for_testing()).unwrap()
}

/// Node with one wallet ("alice", passkey "alice-pass") holding `amount`
pub fn funded_node(amount: u64) -> (CreditNode, WalletCreated, Block) {
    let node = test_node();
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    node.issue_credit(&alice.address, amount).unwrap();
    let block = node.mine().unwrap().unwrap();
    (node, alice, block)
}
