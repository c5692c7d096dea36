use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;

const MAX_NONCE: u64 = u64::MAX;

/// How many nonces to try between checks of the abort condition
const ABORT_CHECK_INTERVAL: u64 = 1024;

/// The hash puzzle: find a nonce whose block hash starts with `difficulty`
/// hex zeros.
pub struct ProofOfWork {
    prefix: Vec<u8>,
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: &Block) -> Result<ProofOfWork> {
        Ok(ProofOfWork {
            prefix: Self::prepare_prefix(block)?,
            difficulty: block.get_difficulty(),
        })
    }

    /// Recompute the block hash from its fields and check it against both the
    /// stored hash and the block's difficulty.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(e) => {
                log::error!("Could not encode block {} for validation: {e}", block.get_index());
                return false;
            }
        };
        let hash = pow.hash_with_nonce(block.get_nonce());
        hash == block.get_hash() && meets_difficulty(&hash, block.get_difficulty())
    }

    /// Everything the hash commits to except the nonce. Transactions are
    /// encoded whole, signatures included, in block order.
    fn prepare_prefix(block: &Block) -> Result<Vec<u8>> {
        let mut data_bytes = vec![];
        data_bytes.extend(block.get_previous_hash().as_bytes());
        data_bytes.extend(block.get_index().to_be_bytes());
        data_bytes.extend(block.get_timestamp().to_be_bytes());
        data_bytes.extend(block.get_difficulty().to_be_bytes());
        data_bytes.extend((block.get_transactions().len() as u64).to_be_bytes());
        for transaction in block.get_transactions() {
            let encoded = transaction.serialize()?;
            data_bytes.extend((encoded.len() as u64).to_be_bytes());
            data_bytes.extend(encoded);
        }
        Ok(data_bytes)
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut data = Vec::with_capacity(self.prefix.len() + 8);
        data.extend_from_slice(&self.prefix);
        data.extend(nonce.to_be_bytes());
        HEXLOWER.encode(&sha256_digest(&data))
    }

    /// Search nonces from zero. `should_abort` is polled periodically; once it
    /// returns true the search stops with `ProofOfWorkAborted`.
    pub fn run(&self, should_abort: &dyn Fn() -> bool) -> Result<(u64, String)> {
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            if nonce % ABORT_CHECK_INTERVAL == 0 && should_abort() {
                log::debug!("Proof-of-work aborted at nonce {nonce}");
                return Err(LedgerError::ProofOfWorkAborted);
            }
            let hash = self.hash_with_nonce(nonce);
            if meets_difficulty(&hash, self.difficulty) {
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(LedgerError::ChainIntegrity(
            "Nonce space exhausted without meeting difficulty".to_string(),
        ))
    }
}

/// True when the hex hash starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
