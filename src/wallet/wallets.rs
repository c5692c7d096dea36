use crate::config::KdfParams;
use crate::error::{LedgerError, Result};
use crate::storage::{SecureMemory, WalletStore};
use crate::utils::current_timestamp;
use crate::wallet::{derive_key_pair, SigningKey};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the ledger keeps about a wallet. No private key, ever: it is
/// re-derived from the passkey when a signature is needed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletRecord {
    pub owner_id: String,
    pub address: String,
    pub public_key: Vec<u8>,
    pub passkey_commitment: String,
    /// Advisory copy of the replayed balance. Never authoritative.
    pub cached_balance: u64,
    pub created_at: i64,
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("owner_id", &self.owner_id)
            .field("address", &self.address)
            .field("cached_balance", &self.cached_balance)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Wallet creation and passkey checks on top of a [`WalletStore`]
pub struct WalletService {
    store: Arc<dyn WalletStore>,
    kdf: KdfParams,
}

impl WalletService {
    pub fn new(store: Arc<dyn WalletStore>, kdf: KdfParams) -> WalletService {
        WalletService { store, kdf }
    }

    /// One wallet per owner. The key pair is derived, the record stored,
    /// and the key dropped.
    pub fn create_wallet(&self, owner_id: &str, passkey: &str) -> Result<WalletRecord> {
        if self.store.resolve_wallet(owner_id)?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Owner {owner_id} already has a wallet"
            )));
        }

        let keys = derive_key_pair(owner_id, passkey, &self.kdf)?;
        let record = WalletRecord {
            owner_id: owner_id.to_string(),
            address: keys.signing_key.address().to_string(),
            public_key: keys.signing_key.public_key().to_vec(),
            passkey_commitment: keys.passkey_commitment,
            cached_balance: 0,
            created_at: current_timestamp()?,
        };
        self.store.insert_wallet(&record)?;
        info!("Created wallet {} for owner {owner_id}", record.address);
        Ok(record)
    }

    /// Check `passkey` against the wallet at `address` and hand back the
    /// record together with the re-derived signing key.
    pub fn unlock(&self, address: &str, passkey: &str) -> Result<(WalletRecord, SigningKey)> {
        let record = self.find_by_address(address)?;
        let keys = match derive_key_pair(&record.owner_id, passkey, &self.kdf) {
            Ok(keys) => keys,
            // Empty passkey and the like
            Err(LedgerError::Validation(_)) => return Err(LedgerError::InvalidPasskey),
            Err(e) => return Err(e),
        };

        let commitment_ok = SecureMemory::constant_time_eq(
            keys.passkey_commitment.as_bytes(),
            record.passkey_commitment.as_bytes(),
        );
        if !commitment_ok || keys.signing_key.address() != record.address {
            warn!("Rejected passkey for wallet {address}");
            return Err(LedgerError::InvalidPasskey);
        }
        Ok((record, keys.signing_key))
    }

    pub fn authenticate(&self, address: &str, passkey: &str) -> Result<WalletRecord> {
        self.unlock(address, passkey).map(|(record, _)| record)
    }

    pub fn resolve_wallet(&self, owner_id: &str) -> Result<WalletRecord> {
        self.store
            .resolve_wallet(owner_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("Wallet for owner {owner_id}")))
    }

    pub fn find_by_address(&self, address: &str) -> Result<WalletRecord> {
        self.store
            .find_wallet_by_address(address)?
            .ok_or_else(|| LedgerError::NotFound(format!("Wallet {address}")))
    }
}
