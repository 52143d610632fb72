//! Fingerprint of the configuration a deployment was made with.
//!
//! The hash is stamped on every run record; resuming with a different hash logs a warning.

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::DeployConfig;

/// Configuration parameters that end up on-chain.
///
/// Only values that change constructor arguments or wiring calls are included. Operational
/// settings (endpoints, timeouts, retry bounds, verification) are explicitly excluded, so
/// changing them never invalidates a resumable manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFingerprint {
    pub platform_fee_basis_points: u64,
    pub min_bet_amount: U256,
    pub max_bet_amount: U256,
    pub min_delay_seconds: u64,
    pub token_name: String,
    pub token_symbol: String,
    pub initial_supply: U256,
    pub reward_amount: U256,
    pub oracle_address_override: Option<Address>,
    pub create_sample_market: bool,
    pub sample_market_game_time: Option<u64>,
}

impl DeploymentFingerprint {
    /// Extract deployment-relevant configuration.
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            platform_fee_basis_points: config.platform_fee_basis_points,
            min_bet_amount: config.min_bet_amount,
            max_bet_amount: config.max_bet_amount,
            min_delay_seconds: config.min_delay_seconds,
            token_name: config.token_name.clone(),
            token_symbol: config.token_symbol.clone(),
            initial_supply: config.initial_supply,
            reward_amount: config.reward_amount,
            oracle_address_override: config.oracle_address_override,
            create_sample_market: config.create_sample_market,
            sample_market_game_time: config.sample_market_game_time,
        }
    }

    /// Compute a SHA-256 hash of this configuration.
    ///
    /// The hash is deterministic: the struct is serialized to JSON in field order before
    /// hashing.
    pub fn compute_hash(&self) -> String {
        let json = serde_json::to_string(self)
            .expect("DeploymentFingerprint serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());

        hex::encode(hasher.finalize())
    }
}
