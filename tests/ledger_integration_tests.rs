//! Ledger integration tests
//!
//! Drives a whole node through its public API: issuing credit, direct
//! transfers, the QR handshake, and reopening a sled-backed ledger.

use credit_ledger::{
    Config, CreditNode, LedgerError, QrStatus, TxStatus, WalletCreated,
};
use std::time::Duration;
use tempfile::tempdir;

fn node_with_difficulty(difficulty: u32) -> CreditNode {
    let config = Config {
        difficulty,
        ..Config::for_testing()
    };
    CreditNode::in_memory(config).unwrap()
}

fn fund(node: &CreditNode, wallet: &WalletCreated, amount: u64) {
    node.issue_credit(&wallet.address, amount).unwrap();
    node.mine().unwrap().expect("issuance should be mined");
}

#[test]
fn test_transfer_is_mined_at_configured_difficulty() {
    let node = node_with_difficulty(2);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let bob = node.create_wallet("bob", "bob-pass").unwrap();
    fund(&node, &alice, 100);

    let submitted = node
        .create_transaction(&alice.address, &bob.address, 10, "alice-pass")
        .unwrap();
    let verified = node
        .verify_transaction(&submitted.tx_hash, &bob.public_key)
        .unwrap();

    let block = node.get_block(verified.receipt.block_index).unwrap();
    assert!(block.get_hash().starts_with("00"));
    assert!(block.contains_transaction(&submitted.tx_hash));
    assert_eq!(node.balance(&alice.address).unwrap().confirmed, 90);
    assert_eq!(node.balance(&bob.address).unwrap().confirmed, 10);
    assert!(node.validate());
}

#[test]
fn test_overdraft_is_rejected_without_touching_the_pool() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let bob = node.create_wallet("bob", "bob-pass").unwrap();
    fund(&node, &alice, 100);
    let height = node.get_chain_info().unwrap().chain.height;

    let result = node.create_transaction(&alice.address, &bob.address, 150, "alice-pass");
    assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));

    let stats = node.get_chain_info().unwrap();
    assert_eq!(stats.pending_transactions, 0);
    assert_eq!(stats.chain.height, height);
    assert_eq!(node.balance(&alice.address).unwrap().pending_inclusive, 100);
}

#[test]
fn test_pending_spends_count_against_the_balance() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let bob = node.create_wallet("bob", "bob-pass").unwrap();
    let carol = node.create_wallet("carol", "carol-pass").unwrap();
    fund(&node, &alice, 100);

    node.create_transaction(&alice.address, &bob.address, 60, "alice-pass")
        .unwrap();
    let second = node.create_transaction(&alice.address, &carol.address, 60, "alice-pass");
    assert!(matches!(second, Err(LedgerError::InsufficientBalance { .. })));
    assert_eq!(node.balance(&alice.address).unwrap().pending_inclusive, 40);
}

#[test]
fn test_qr_handshake_seals_exactly_one_transfer() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let shop = node.create_wallet("coffee-shop", "shop-pass").unwrap();
    fund(&node, &alice, 100);

    let qr = node
        .generate_qr(&alice.address, "coffee-shop", 20, "alice-pass")
        .unwrap();
    assert_eq!(node.get_qr(&qr.qr_id).unwrap().status, QrStatus::Generated);

    let scanned = node
        .scan_qr(&qr.qr_payload, &shop.address, "shop-pass")
        .unwrap();
    assert_eq!(scanned.amount, 20);

    let executed = node.execute_qr(&qr.qr_id, &shop.address).unwrap();
    let verification = node.verify_qr(&qr.qr_id, &shop.public_key).unwrap();
    assert_eq!(verification.status, QrStatus::Verified);
    assert_eq!(verification.receipt.tx_hash, executed.tx_hash);

    let sealed: Vec<_> = node
        .get_ledger()
        .get_blocks()
        .unwrap()
        .iter()
        .flat_map(|block| block.get_transactions().to_vec())
        .filter(|tx| tx.get_from() == Some(alice.address.as_str()))
        .collect();
    assert_eq!(sealed.len(), 1);
    assert_eq!(sealed[0].get_amount(), 20);

    let record = node.get_transaction(&executed.tx_hash).unwrap();
    assert_eq!(record.status, TxStatus::Confirmed);
    assert_eq!(node.balance(&shop.address).unwrap().confirmed, 20);

    // A verified transfer cannot be verified again
    assert!(matches!(
        node.verify_qr(&qr.qr_id, &shop.public_key),
        Err(LedgerError::StateTransition(_))
    ));
}

#[test]
fn test_qr_steps_out_of_order_are_rejected() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let shop = node.create_wallet("shop", "shop-pass").unwrap();
    fund(&node, &alice, 100);
    let qr = node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();
    let before = node.get_qr(&qr.qr_id).unwrap();

    assert!(matches!(
        node.execute_qr(&qr.qr_id, &shop.address),
        Err(LedgerError::StateTransition(_))
    ));
    assert!(matches!(
        node.verify_qr(&qr.qr_id, &shop.public_key),
        Err(LedgerError::StateTransition(_))
    ));
    assert_eq!(node.get_qr(&qr.qr_id).unwrap(), before);

    node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass")
        .unwrap();
    assert!(matches!(
        node.scan_qr(&qr.qr_payload, &shop.address, "shop-pass"),
        Err(LedgerError::StateTransition(_))
    ));
}

#[test]
fn test_tampered_payload_is_rejected() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let shop = node.create_wallet("shop", "shop-pass").unwrap();
    fund(&node, &alice, 100);
    node.generate_qr(&alice.address, "shop", 20, "alice-pass").unwrap();

    assert!(node
        .scan_qr("bm90IGEgcXIgcGF5bG9hZA==", &shop.address, "shop-pass")
        .is_err());
}

#[test]
fn test_balances_conserve_issued_credit() {
    let node = node_with_difficulty(1);
    let wallets: Vec<WalletCreated> = ["alice", "bob", "carol"]
        .iter()
        .map(|name| node.create_wallet(name, &format!("{name}-pass")).unwrap())
        .collect();
    fund(&node, &wallets[0], 70);
    fund(&node, &wallets[1], 30);

    let transfers = [(0, 1, 25), (1, 2, 40), (0, 2, 5), (2, 0, 12)];
    for (from, to, amount) in transfers {
        let passkey = format!("{}-pass", wallets[from].owner_id);
        let submitted = node
            .create_transaction(&wallets[from].address, &wallets[to].address, amount, &passkey)
            .unwrap();
        node.verify_transaction(&submitted.tx_hash, &wallets[to].public_key)
            .unwrap();
    }

    let total: u64 = wallets
        .iter()
        .map(|wallet| node.balance(&wallet.address).unwrap().confirmed)
        .sum();
    assert_eq!(total, 100);
    assert_eq!(node.balance(&wallets[0].address).unwrap().confirmed, 52);
    assert_eq!(node.balance(&wallets[1].address).unwrap().confirmed, 15);
    assert_eq!(node.balance(&wallets[2].address).unwrap().confirmed, 33);
    assert_eq!(node.history(&wallets[2].address).unwrap().len(), 3);
}

#[test]
fn test_sled_ledger_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        ..Config::for_testing()
    };

    let (alice, bob, tip) = {
        let node = CreditNode::open(config.clone()).unwrap();
        let alice = node.create_wallet("alice", "alice-pass").unwrap();
        let bob = node.create_wallet("bob", "bob-pass").unwrap();
        fund(&node, &alice, 100);
        let submitted = node
            .create_transaction(&alice.address, &bob.address, 35, "alice-pass")
            .unwrap();
        node.verify_transaction(&submitted.tx_hash, &bob.public_key)
            .unwrap();
        let tip = node.get_chain_info().unwrap().chain.latest_hash;
        (alice, bob, tip)
    };

    let node = CreditNode::open(config).unwrap();
    let stats = node.get_chain_info().unwrap();
    assert_eq!(stats.chain.latest_hash, tip);
    assert_eq!(stats.chain.height, 2);
    assert!(stats.is_valid);
    assert_eq!(node.balance(&alice.address).unwrap().confirmed, 65);
    assert_eq!(node.balance(&bob.address).unwrap().confirmed, 35);

    // Wallets persist too: the passkey still opens alice's wallet
    assert!(matches!(
        node.create_wallet("alice", "alice-pass"),
        Err(LedgerError::Validation(_))
    ));
    node.create_transaction(&alice.address, &bob.address, 5, "alice-pass")
        .unwrap();
}

#[test]
fn test_background_miner_seals_issuance() {
    let node = node_with_difficulty(1);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let miner = node.spawn_miner(Duration::from_millis(20));

    node.issue_credit(&alice.address, 50).unwrap();
    let mut confirmed = 0;
    for _ in 0..100 {
        confirmed = node.balance(&alice.address).unwrap().confirmed;
        if confirmed == 50 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    miner.stop();

    assert_eq!(confirmed, 50);
    assert_eq!(node.get_chain_info().unwrap().pending_transactions, 0);
}

#[test]
fn test_unknown_lookups() {
    let node = node_with_difficulty(1);
    assert!(matches!(node.get_block(7), Err(LedgerError::NotFound(_))));
    assert!(matches!(
        node.get_transaction("deadbeef"),
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(node.get_qr("missing"), Err(LedgerError::NotFound(_))));
    assert!(node.mine().unwrap().is_none());
}

#[test]
fn test_overlapping_mines_do_not_halt_the_ledger() {
    let node = node_with_difficulty(4);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    node.issue_credit(&alice.address, 100).unwrap();

    let mine = || node.mine();
    let (first, second) = std::thread::scope(|s| {
        let a = s.spawn(mine);
        let b = s.spawn(mine);
        (a.join().unwrap(), b.join().unwrap())
    });

    let mined = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .count();
    assert_eq!(mined, 1);
    assert!(!node.get_ledger().is_halted());
    assert_eq!(node.balance(&alice.address).unwrap().confirmed, 100);

    // Writes still go through
    node.issue_credit(&alice.address, 5).unwrap();
    assert!(node.mine().unwrap().is_some());
}

#[test]
fn test_overlapping_verifications_confirm_once() {
    let node = node_with_difficulty(3);
    let alice = node.create_wallet("alice", "alice-pass").unwrap();
    let bob = node.create_wallet("bob", "bob-pass").unwrap();
    fund(&node, &alice, 100);
    let submitted = node
        .create_transaction(&alice.address, &bob.address, 10, "alice-pass")
        .unwrap();

    let verify = || node.verify_transaction(&submitted.tx_hash, &bob.public_key);
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
    assert_eq!(node.balance(&alice.address).unwrap().confirmed, 90);
    assert_eq!(node.balance(&bob.address).unwrap().confirmed, 10);
}

#[test]
fn test_pending_work_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        ..Config::for_testing()
    };

    let (alice, bob, carol, first_spend) = {
        let node = CreditNode::open(config.clone()).unwrap();
        let alice = node.create_wallet("alice", "alice-pass").unwrap();
        let bob = node.create_wallet("bob", "bob-pass").unwrap();
        let carol = node.create_wallet("carol", "carol-pass").unwrap();
        fund(&node, &alice, 100);
        let first_spend = node
            .create_transaction(&alice.address, &bob.address, 70, "alice-pass")
            .unwrap();
        node.issue_credit(&carol.address, 5).unwrap();
        (alice, bob, carol, first_spend)
    };

    let node = CreditNode::open(config).unwrap();
    assert_eq!(node.get_chain_info().unwrap().pending_transactions, 2);
    assert_eq!(node.balance(&alice.address).unwrap().pending_inclusive, 30);

    let second = node.create_transaction(&alice.address, &bob.address, 70, "alice-pass");
    assert!(matches!(second, Err(LedgerError::InsufficientBalance { .. })));

    assert!(node.mine().unwrap().is_some());
    assert_eq!(node.balance(&carol.address).unwrap().confirmed, 5);

    // The restored spend can still be verified and sealed
    node.verify_transaction(&first_spend.tx_hash, &bob.public_key)
        .unwrap();
    assert_eq!(node.balance(&alice.address).unwrap().confirmed, 30);
    assert_eq!(node.balance(&bob.address).unwrap().confirmed, 70);
}
