//! Wallets
//!
//! Key pairs are derived from (owner id, passkey) and never stored. The
//! ledger only keeps a [`WalletRecord`]: address, public key and a passkey
//! commitment.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_from_public_key, derive_key_pair, public_key_from_address, stretch, validate_address,
    DerivedKeys, SigningKey, ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{WalletRecord, WalletService};
