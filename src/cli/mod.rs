//! Command-line interface
//!
//! Argument parsing for the `credit-ledger` binary. Every command maps to one
//! [`crate::CreditNode`] operation and prints its result as JSON.

pub mod commands;

pub use commands::{Command, Opt};
