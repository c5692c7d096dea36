// Entry point for the credit-ledger CLI. Each run opens the sled-backed node,
// performs one command, and prints the result as JSON on stdout.

use clap::Parser;
use credit_ledger::{Command, Config, CreditNode, LedgerError, Opt};
use log::{error, LevelFilter};
use serde::Serialize;
use serde_json::json;
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), LedgerError> {
    let config = Config::load(opt.config.as_deref())?;
    let node = CreditNode::open(config)?;
    run_command(&node, opt.command)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), LedgerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_command(node: &CreditNode, command: Command) -> Result<(), LedgerError> {
    match command {
        Command::CreateWallet { owner_id, passkey } => {
            print_json(&node.create_wallet(&owner_id, &passkey)?)
        }
        Command::Issue { to, amount, mine } => {
            let submitted = node.issue_credit(&to, amount)?;
            let block = if mine { node.mine()? } else { None };
            print_json(&json!({
                "tx_hash": submitted.tx_hash,
                "status": submitted.status,
                "block_index": block.as_ref().map(|b| b.get_index()),
            }))
        }
        Command::Send {
            from,
            to,
            amount,
            passkey,
        } => print_json(&node.create_transaction(&from, &to, amount, &passkey)?),
        Command::Verify {
            tx_hash,
            public_key,
        } => print_json(&node.verify_transaction(&tx_hash, &public_key)?),
        Command::GenerateQr {
            sender,
            recipient_group,
            amount,
            passkey,
        } => print_json(&node.generate_qr(&sender, &recipient_group, amount, &passkey)?),
        Command::ScanQr {
            payload,
            receiver,
            passkey,
        } => print_json(&node.scan_qr(&payload, &receiver, &passkey)?),
        Command::ExecuteQr { qr_id, receiver } => {
            print_json(&node.execute_qr(&qr_id, &receiver)?)
        }
        Command::VerifyQr { qr_id, public_key } => {
            print_json(&node.verify_qr(&qr_id, &public_key)?)
        }
        Command::GetQr { qr_id } => {
            let record = node.get_qr(&qr_id)?;
            print_json(&json!({
                "qr_id": record.qr_id,
                "status": record.status,
                "sender_address": record.sender_address,
                "recipient_group_id": record.recipient_group_id,
                "amount": record.amount,
                "receiver_address": record.receiver_address,
                "transaction_hash": record.transaction_hash,
                "created_at": record.created_at,
            }))
        }
        Command::Balance { address } => print_json(&node.balance(&address)?),
        Command::History { address } => print_json(&node.history(&address)?),
        Command::GetTransaction { tx_hash } => print_json(&node.get_transaction(&tx_hash)?),
        Command::ChainInfo => print_json(&node.get_chain_info()?),
        Command::GetBlock { index } => print_json(&node.get_block(index)?),
        Command::Validate { acknowledge } => {
            if acknowledge {
                node.acknowledge_integrity_failure()?;
            }
            print_json(&json!({ "valid": node.validate() }))
        }
        Command::Mine => {
            let block = node.mine()?;
            print_json(&json!({
                "mined": block.is_some(),
                "block": block,
            }))
        }
    }
}
