//! Configuration management
//!
//! This module holds the node settings: where data lives, how hard blocks are
//! to mine, reward and QR expiry policy, and the key-derivation cost.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables.

pub mod settings;

pub use settings::{Config, KdfParams, MiningPolicy};
