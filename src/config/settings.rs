use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

static DEFAULT_DATA_DIR: &str = "data";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const MINING_REWARD_KEY: &str = "LEDGER_MINING_REWARD";
const REWARD_ADDRESS_KEY: &str = "LEDGER_REWARD_ADDRESS";
const QR_TTL_KEY: &str = "LEDGER_QR_TTL_SECS";

/// A SHA-256 hex digest has 64 characters, so that is the hardest puzzle.
pub const MAX_DIFFICULTY: u32 = 64;

/// What the miner does when the pending pool is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningPolicy {
    /// Defer mining until at least one real transaction is pending
    RequirePending,
    /// Mine anyway; the block carries only the reward issuance
    AllowEmpty,
}

/// Argon2id cost parameters used for wallet keys and QR payload keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and local experiments.
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub difficulty: u32,
    pub mining_reward: u64,
    pub reward_address: Option<String>,
    pub mining_policy: MiningPolicy,
    pub qr_ttl_secs: u64,
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            difficulty: 2,
            mining_reward: 100,
            reward_address: None,
            mining_policy: MiningPolicy::RequirePending,
            qr_ttl_secs: 900,
            kdf: KdfParams::default(),
        }
    }
}

impl Config {
    /// Load settings: defaults, then the TOML file if given, then environment.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Settings tuned for tests: trivial difficulty and cheap key stretching.
    pub fn for_testing() -> Config {
        Config {
            difficulty: 1,
            kdf: KdfParams::fast(),
            ..Default::default()
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(value) = env::var(DIFFICULTY_KEY) {
            self.difficulty = parse_env(DIFFICULTY_KEY, &value)?;
        }
        if let Ok(value) = env::var(MINING_REWARD_KEY) {
            self.mining_reward = parse_env(MINING_REWARD_KEY, &value)?;
        }
        if let Ok(addr) = env::var(REWARD_ADDRESS_KEY) {
            self.reward_address = if addr.is_empty() { None } else { Some(addr) };
        }
        if let Ok(value) = env::var(QR_TTL_KEY) {
            self.qr_ttl_secs = parse_env(QR_TTL_KEY, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "difficulty must be at most {MAX_DIFFICULTY}, got {}",
                self.difficulty
            )));
        }
        if self.qr_ttl_secs == 0 {
            return Err(LedgerError::Config(
                "qr_ttl_secs must be positive".to_string(),
            ));
        }
        if self.kdf.parallelism == 0 || self.kdf.iterations == 0 {
            return Err(LedgerError::Config(
                "kdf iterations and parallelism must be positive".to_string(),
            ));
        }
        // Argon2 needs at least 8 KiB per lane
        if self.kdf.memory_kib < 8 * self.kdf.parallelism {
            return Err(LedgerError::Config(format!(
                "kdf memory_kib must be at least {}",
                8 * self.kdf.parallelism
            )));
        }
        if let Some(addr) = &self.reward_address {
            if !crate::wallet::validate_address(addr) {
                return Err(LedgerError::Config(format!(
                    "reward_address is not a valid address: {addr}"
                )));
            }
        }
        Ok(())
    }

    /// Where the sled database lives
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| LedgerError::Config(format!("{key} has an invalid value: {value}")))
}
