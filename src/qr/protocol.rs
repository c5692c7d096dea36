// The four-step QR handshake. The sender generates a QR holding a transfer
// they already signed; the receiver scans it, executes it into the pending
// pool, and verification seals it. Every status change is a compare-and-swap
// against the status the step started from, so two racing callers cannot
// both move the same transfer forward. Verification also claims the transfer
// for its whole run, since sealing happens between the read and the swap.

use crate::config::KdfParams;
use crate::core::{Metadata, Receipt, TransactionEngine, TxStatus, QR_ID_KEY};
use crate::error::{LedgerError, Result};
use crate::qr::{QrEnvelope, QrIntent, QrStatus, QrTransfer};
use crate::storage::QrStore;
use crate::utils::current_timestamp;
use crate::wallet::WalletService;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedQr {
    pub qr_id: String,
    pub qr_payload: String,
}

/// The decrypted intent as shown to the receiver after a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedQr {
    pub qr_id: String,
    pub sender_address: String,
    pub sender_public_key: String,
    pub receiver_address: String,
    pub recipient_group_id: String,
    pub amount: u64,
    pub tx_hash: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrVerification {
    pub qr_id: String,
    pub status: QrStatus,
    pub receipt: Receipt,
}

pub struct QrProtocol {
    engine: Arc<TransactionEngine>,
    wallets: Arc<WalletService>,
    store: Arc<dyn QrStore>,
    kdf: KdfParams,
    ttl_secs: u64,
    // QR ids with a verification in flight
    verifying: Mutex<HashSet<String>>,
}

/// Held while one caller verifies a transfer; releases the id on drop
struct VerifyClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    qr_id: String,
}

impl Drop for VerifyClaim<'_> {
    fn drop(&mut self) {
        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&self.qr_id);
            }
            Err(_) => warn!("Failed to release verification claim on {}", self.qr_id),
        }
    }
}

impl QrProtocol {
    pub fn new(
        engine: Arc<TransactionEngine>,
        wallets: Arc<WalletService>,
        store: Arc<dyn QrStore>,
        kdf: KdfParams,
        ttl_secs: u64,
    ) -> QrProtocol {
        QrProtocol {
            engine,
            wallets,
            store,
            kdf,
            ttl_secs,
            verifying: Mutex::new(HashSet::new()),
        }
    }

    /// Sender side. Signs the transfer to the group's wallet now and seals
    /// it into an encrypted payload.
    pub fn generate(
        &self,
        sender_address: &str,
        recipient_group_id: &str,
        amount: u64,
        passkey: &str,
    ) -> Result<GeneratedQr> {
        let (sender, key) = self.wallets.unlock(sender_address, passkey)?;
        let recipient = self.wallets.resolve_wallet(recipient_group_id)?;

        let qr_id = Uuid::new_v4().simple().to_string();
        let mut data = Metadata::new();
        data.insert(QR_ID_KEY.to_string(), qr_id.clone());
        let transaction =
            self.engine
                .create_transaction(&sender.address, &recipient.address, amount, &key, data)?;
        drop(key);

        let intent = QrIntent {
            qr_id: qr_id.clone(),
            recipient_group_id: recipient_group_id.to_string(),
            amount,
            sender_address: sender.address.clone(),
            sender_public_key: data_encoding::HEXLOWER.encode(&sender.public_key),
            timestamp: transaction.get_timestamp(),
            transaction,
        };
        let envelope = QrEnvelope::seal(&intent, &self.kdf)?;
        let qr_payload = envelope.to_payload()?;
        self.store.insert_qr(&QrTransfer::new(&intent, envelope))?;

        info!(
            "Generated QR transfer {qr_id}: {} -> {recipient_group_id} ({amount})",
            sender.address
        );
        Ok(GeneratedQr { qr_id, qr_payload })
    }

    /// Receiver side. Decrypts the payload and claims the transfer.
    pub fn scan(&self, payload: &str, receiver_address: &str, passkey: &str) -> Result<ScannedQr> {
        let envelope = QrEnvelope::from_payload(payload)?;
        let record = self.load_live(&envelope.qr_id)?;
        expect_status(&record, QrStatus::Generated)?;

        let receiver = self.wallets.authenticate(receiver_address, passkey)?;
        if envelope != record.envelope {
            return Err(LedgerError::Validation(format!(
                "Payload does not match QR transfer {}",
                record.qr_id
            )));
        }

        let intent = envelope.open(&self.kdf)?;
        intent.transaction.verify()?;
        if intent.transaction.get_to() != receiver.address {
            return Err(LedgerError::CounterpartyMismatch(format!(
                "QR transfer {} is not addressed to {}",
                record.qr_id, receiver.address
            )));
        }

        let mut scanned = record.advance(QrStatus::Scanned, current_timestamp()?)?;
        scanned.receiver_address = Some(receiver.address.clone());
        self.store
            .compare_and_swap_qr(QrStatus::Generated, &scanned)?;
        info!("QR transfer {} scanned by {}", record.qr_id, receiver.address);

        Ok(ScannedQr {
            qr_id: intent.qr_id,
            sender_address: intent.sender_address,
            sender_public_key: intent.sender_public_key,
            receiver_address: receiver.address,
            recipient_group_id: intent.recipient_group_id,
            amount: intent.amount,
            tx_hash: intent.transaction.get_hash().to_string(),
            timestamp: intent.timestamp,
        })
    }

    /// Put the pre-signed transfer into the pending pool. If the sender can
    /// no longer cover it the transfer stays SCANNED and can be retried.
    pub fn execute(&self, qr_id: &str, receiver_address: &str) -> Result<String> {
        let record = self.load_live(qr_id)?;
        expect_status(&record, QrStatus::Scanned)?;
        if record.receiver_address.as_deref() != Some(receiver_address) {
            return Err(LedgerError::CounterpartyMismatch(format!(
                "QR transfer {qr_id} was scanned by a different receiver"
            )));
        }

        let transaction = record.envelope.open(&self.kdf)?.transaction;
        let tx_hash = transaction.get_hash().to_string();
        let mut completed = record.advance(QrStatus::Completed, current_timestamp()?)?;
        completed.transaction_hash = Some(tx_hash.clone());

        self.engine.add_pending(transaction)?;
        if let Err(e) = self
            .store
            .compare_and_swap_qr(QrStatus::Scanned, &completed)
        {
            // Lost to a concurrent expiry; the transfer must not stay payable
            self.engine.cancel_pending(&tx_hash, "QR transfer changed during execute")?;
            return Err(e);
        }

        info!("QR transfer {qr_id} executed as transaction {tx_hash}");
        Ok(tx_hash)
    }

    /// Seal the executed transfer after checking the counterparty's key.
    /// A failed check fails the transaction and the QR transfer for good.
    pub fn verify(&self, qr_id: &str, counterparty_key: &[u8]) -> Result<QrVerification> {
        let _claim = self.claim_verification(qr_id)?;
        let record = self.find(qr_id)?;
        expect_status(&record, QrStatus::Completed)?;
        let tx_hash = record.transaction_hash.clone().ok_or_else(|| {
            LedgerError::StateTransition(format!("QR transfer {qr_id} has no transaction"))
        })?;

        match self.engine.verify_and_confirm(&tx_hash, counterparty_key) {
            Ok(receipt) => {
                let verified = record.advance(QrStatus::Verified, current_timestamp()?)?;
                self.store
                    .compare_and_swap_qr(QrStatus::Completed, &verified)?;
                info!(
                    "QR transfer {qr_id} verified in block {}",
                    receipt.block_index
                );
                Ok(QrVerification {
                    qr_id: qr_id.to_string(),
                    status: QrStatus::Verified,
                    receipt,
                })
            }
            Err(e) => {
                let failed_for_good = match self.engine.find_transaction(&tx_hash) {
                    Ok(tx) => tx.status == TxStatus::Failed,
                    Err(lookup) => {
                        warn!("Could not look up transaction {tx_hash}: {lookup}");
                        false
                    }
                };
                if failed_for_good {
                    if let Err(mark) = self.mark_failed(&record, &e) {
                        warn!("Could not mark QR transfer {qr_id} failed: {mark}");
                    }
                }
                Err(e)
            }
        }
    }

    fn claim_verification(&self, qr_id: &str) -> Result<VerifyClaim<'_>> {
        let mut in_flight = self.verifying.lock()?;
        if !in_flight.insert(qr_id.to_string()) {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {qr_id} is already being verified"
            )));
        }
        Ok(VerifyClaim {
            in_flight: &self.verifying,
            qr_id: qr_id.to_string(),
        })
    }

    fn mark_failed(&self, record: &QrTransfer, reason: &LedgerError) -> Result<()> {
        let mut failed = record.advance(QrStatus::Failed, current_timestamp()?)?;
        failed.failure = Some(reason.to_string());
        self.store.compare_and_swap_qr(QrStatus::Completed, &failed)
    }

    /// Current record, with expiry applied
    pub fn get(&self, qr_id: &str) -> Result<QrTransfer> {
        let record = self.find(qr_id)?;
        self.expire_if_due(record)
    }

    fn find(&self, qr_id: &str) -> Result<QrTransfer> {
        self.store
            .find_qr(qr_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("QR transfer {qr_id}")))
    }

    fn load_live(&self, qr_id: &str) -> Result<QrTransfer> {
        let record = self.get(qr_id)?;
        if record.status == QrStatus::Expired {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {qr_id} has expired"
            )));
        }
        Ok(record)
    }

    fn expire_if_due(&self, record: QrTransfer) -> Result<QrTransfer> {
        let now = current_timestamp()?;
        if !record.is_expired(now, self.ttl_secs) {
            return Ok(record);
        }

        let expired = record.advance(QrStatus::Expired, now)?;
        match self.store.compare_and_swap_qr(record.status, &expired) {
            Ok(()) => {
                info!("QR transfer {} expired", record.qr_id);
                Ok(expired)
            }
            // Someone else moved it first; report what is stored now
            Err(LedgerError::StateTransition(_)) => self.find(&record.qr_id),
            Err(e) => Err(e),
        }
    }
}

fn expect_status(record: &QrTransfer, expected: QrStatus) -> Result<()> {
    if record.status != expected {
        return Err(LedgerError::StateTransition(format!(
            "QR transfer {} is {}, expected {expected}",
            record.qr_id, record.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{Block, TransactionRecord};
    use crate::node::CreditNode;
    use crate::storage::{BlockStore, MemoryStore, TransactionStore, WalletStore};
    use crate::testkit::funded_node;
    use crate::wallet::WalletRecord;

    #[test]
    fn test_full_handshake() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();

        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        let scanned = node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();
        assert_eq!(scanned.amount, 20);
        assert_eq!(scanned.sender_address, alice.address);
        assert_eq!(scanned.sender_public_key, alice.public_key);

        let executed = node.execute_qr(&qr.qr_id, &shop.address).unwrap();
        assert_eq!(executed.tx_hash, scanned.tx_hash);
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Completed);

        let verification = node.verify_qr(&qr.qr_id, &shop.public_key).unwrap();
        assert_eq!(verification.status, QrStatus::Verified);
        assert_eq!(verification.receipt.amount, 20);

        let record = node.get_qr(&qr.qr_id).unwrap();
        assert_eq!(record.status, QrStatus::Verified);
        assert_eq!(record.receiver_address.as_deref(), Some(shop.address.as_str()));
        assert!(record.verified_at.is_some());
        assert_eq!(node.balance(&alice.address).unwrap().confirmed, 80);
        assert_eq!(node.balance(&shop.address).unwrap().confirmed, 20);
    }

    #[test]
    fn test_second_scan_fails() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();

        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();
        assert!(matches!(
            node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass"),
            Err(LedgerError::StateTransition(_))
        ));
    }

    #[test]
    fn test_execute_before_scan_leaves_record_alone() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        let before = node.get_qr(&qr.qr_id).unwrap();

        assert!(matches!(
            node.execute_qr(&qr.qr_id, &shop.address),
            Err(LedgerError::StateTransition(_))
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap(), before);
        assert_eq!(node.get_engine().pending_count(), 0);
    }

    #[test]
    fn test_only_the_intended_receiver_can_scan() {
        let (node, alice, _) = funded_node(100);
        node.create_wallet("shop", "shop-pass").unwrap();
        let stranger = node.create_wallet("stranger", "stranger-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();

        assert!(matches!(
            node.scan_qr(&qr.qr_payload, &stranger.address, "stranger-pass"),
            Err(LedgerError::CounterpartyMismatch(_))
        ));
        assert!(matches!(
            node.scan_qr(&qr.qr_payload, &stranger.address, "wrong"),
            Err(LedgerError::InvalidPasskey)
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Generated);
    }

    #[test]
    fn test_execute_by_other_receiver_is_rejected() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let stranger = node.create_wallet("stranger", "stranger-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();

        assert!(matches!(
            node.execute_qr(&qr.qr_id, &stranger.address),
            Err(LedgerError::CounterpartyMismatch(_))
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Scanned);
    }

    #[test]
    fn test_verify_with_wrong_key_fails_both_records() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();
        let executed = node.execute_qr(&qr.qr_id, &shop.address).unwrap();

        assert!(matches!(
            node.verify_qr(&qr.qr_id, &alice.public_key),
            Err(LedgerError::CounterpartyMismatch(_))
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Failed);
        assert_eq!(
            node.get_transaction(&executed.tx_hash).unwrap().status,
            TxStatus::Failed
        );
        assert_eq!(node.balance(&shop.address).unwrap().confirmed, 0);

        // Terminal: the right key does not bring it back
        assert!(matches!(
            node.verify_qr(&qr.qr_id, &shop.public_key),
            Err(LedgerError::StateTransition(_))
        ));
    }

    #[test]
    fn test_execute_without_funds_stays_scanned() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let cafe = node.create_wallet("cafe", "cafe-pass").unwrap();

        let qr = node.generate_qr(&alice.address, "shop", 80, "alice-pass").unwrap();
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();

        // Alice spends most of it elsewhere first
        node.create_transaction(&alice.address, &cafe.address, 50, "alice-pass")
            .unwrap();

        assert!(matches!(
            node.execute_qr(&qr.qr_id, &shop.address),
            Err(LedgerError::InsufficientBalance {
                required: 80,
                available: 50
            })
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Scanned);
    }

    #[test]
    fn test_unknown_recipient_group() {
        let (node, alice, _) = funded_node(100);
        assert!(matches!(
            node.generate_qr(&alice.address, "nobody", 20, "alice-pass"),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            node.generate_qr(&alice.address, "nobody", 20, "wrong"),
            Err(LedgerError::InvalidPasskey)
        ));
    }

    #[test]
    fn test_stale_qr_expires() {
        let mut config = Config::for_testing();
        config.qr_ttl_secs = 1;
        let node = CreditNode::in_memory(config).unwrap();
        let alice = node.create_wallet("alice", "alice-pass").unwrap();
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        node.issue_credit(&alice.address, 100).unwrap();
        node.mine().unwrap();

        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));

        assert!(matches!(
            node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass"),
            Err(LedgerError::StateTransition(_))
        ));
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Expired);
    }

    // Memory store whose transaction lookups start failing after a set number
    struct FailingLookups {
        inner: MemoryStore,
        lookups_left: Mutex<Option<u32>>,
    }

    impl FailingLookups {
        fn allow_lookups(&self, count: u32) {
            *self.lookups_left.lock().unwrap() = Some(count);
        }
    }

    impl BlockStore for FailingLookups {
        fn persist_block(&self, block: &Block) -> Result<()> {
            self.inner.persist_block(block)
        }
        fn load_blocks_ordered(&self) -> Result<Vec<Block>> {
            self.inner.load_blocks_ordered()
        }
    }

    impl WalletStore for FailingLookups {
        fn resolve_wallet(&self, owner_id: &str) -> Result<Option<WalletRecord>> {
            self.inner.resolve_wallet(owner_id)
        }
        fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>> {
            self.inner.find_wallet_by_address(address)
        }
        fn insert_wallet(&self, record: &WalletRecord) -> Result<()> {
            self.inner.insert_wallet(record)
        }
        fn persist_wallet(&self, record: &WalletRecord) -> Result<()> {
            self.inner.persist_wallet(record)
        }
    }

    impl TransactionStore for FailingLookups {
        fn persist_transaction(&self, record: &TransactionRecord) -> Result<()> {
            self.inner.persist_transaction(record)
        }
        fn find_transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRecord>> {
            let mut left = self.lookups_left.lock().unwrap();
            match left.as_mut() {
                Some(0) => Err(LedgerError::Database("lookup unavailable".to_string())),
                Some(n) => {
                    *n -= 1;
                    self.inner.find_transaction_by_hash(hash)
                }
                None => self.inner.find_transaction_by_hash(hash),
            }
        }
        fn transactions_for_address(&self, address: &str) -> Result<Vec<TransactionRecord>> {
            self.inner.transactions_for_address(address)
        }
        fn pending_transactions(&self) -> Result<Vec<TransactionRecord>> {
            self.inner.pending_transactions()
        }
    }

    impl QrStore for FailingLookups {
        fn insert_qr(&self, record: &QrTransfer) -> Result<()> {
            self.inner.insert_qr(record)
        }
        fn find_qr(&self, qr_id: &str) -> Result<Option<QrTransfer>> {
            self.inner.find_qr(qr_id)
        }
        fn compare_and_swap_qr(&self, expected: QrStatus, updated: &QrTransfer) -> Result<()> {
            self.inner.compare_and_swap_qr(expected, updated)
        }
    }

    #[test]
    fn test_verify_reports_its_own_error_when_lookup_fails() {
        let store = Arc::new(FailingLookups {
            inner: MemoryStore::new(),
            lookups_left: Mutex::new(None),
        });
        let node = CreditNode::with_store(Config::for_testing(), Arc::clone(&store)).unwrap();
        let alice = node.create_wallet("alice", "alice-pass").unwrap();
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        node.issue_credit(&alice.address, 100).unwrap();
        node.mine().unwrap().unwrap();

        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();
        node.execute_qr(&qr.qr_id, &shop.address).unwrap();

        // The engine's own read succeeds; the follow-up read afterwards fails
        store.allow_lookups(1);
        assert!(matches!(
            node.verify_qr(&qr.qr_id, &alice.public_key),
            Err(LedgerError::CounterpartyMismatch(_))
        ));
    }

    #[test]
    fn test_second_verifier_is_turned_away() {
        let (node, alice, _) = funded_node(100);
        let shop = node.create_wallet("shop", "shop-pass").unwrap();
        let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass").unwrap();
        node.execute_qr(&qr.qr_id, &shop.address).unwrap();

        let verify = || node.verify_qr(&qr.qr_id, &shop.public_key);
        let results = std::thread::scope(|s| {
            let a = s.spawn(verify);
            let b = s.spawn(verify);
            [a.join().unwrap(), b.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LedgerError::StateTransition(_)))));
        assert!(!node.get_ledger().is_halted());
        assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Verified);
        assert_eq!(node.balance(&shop.address).unwrap().confirmed, 20);
    }
}
