//! Deployment configuration.
//!
//! [`DeployConfig`] is the single configuration type of a run. It is layered by the CLI
//! (defaults, TOML file, environment, flags), validated once, and then consumed by
//! [`crate::fantasy_plan`], the executor and the verification driver.

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ComponentSpec, DeployError, ExecutorConfig, VerifyConfig};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Fantasy.toml";

/// Default JSON-RPC endpoint (a local development node).
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default verification endpoint (Etherscan multichain API).
pub const DEFAULT_VERIFIER_URL: &str = "https://api.etherscan.io/v2/api";

/// Upper bound for fees expressed in basis points.
const MAX_BASIS_POINTS: u64 = 10_000;

/// Configuration of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Overrides the network name detected from the chain id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    /// JSON-RPC endpoint of the ledger node.
    pub rpc_url: Url,
    /// Sender account. Defaults to the first account managed by the node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Directory holding compiled artifacts.
    pub artifacts_dir: PathBuf,
    /// Directory where manifests are written.
    pub deployments_dir: PathBuf,

    /// Platform fee in basis points (250 = 2.5%).
    pub platform_fee_basis_points: u64,
    /// Minimum bet, in ether.
    #[serde(with = "ether")]
    pub min_bet_amount: U256,
    /// Maximum bet, in ether.
    #[serde(with = "ether")]
    pub max_bet_amount: U256,
    /// Timelock minimum delay.
    pub min_delay_seconds: u64,
    pub token_name: String,
    pub token_symbol: String,
    /// Initial token supply, in whole tokens (18 decimals).
    #[serde(with = "ether")]
    pub initial_supply: U256,
    /// Tokens transferred to the market for rewards during wiring.
    #[serde(with = "ether")]
    pub reward_amount: U256,
    /// Use an already deployed oracle instead of deploying one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_address_override: Option<Address>,
    /// Create the sample market once the market is wired.
    pub create_sample_market: bool,
    /// Kick-off time of the sample game. Defaults to one day after plan creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_market_game_time: Option<u64>,

    /// API key of the verification service. Verification is disabled without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_api_key: Option<String>,
    pub verifier_url: Url,
    /// Maximum number of verification submissions in flight.
    pub verify_concurrency: usize,
    /// Attempts per component before it is reported as failed.
    pub verify_attempts: usize,

    /// Attempts per deployment step. Retrying is only safe when a failed submission is
    /// guaranteed not to have landed.
    pub max_deploy_attempts: usize,
    /// Attempts per wiring hook marked idempotent. Other hooks run once.
    pub max_call_attempts: usize,
    pub retry_delay_secs: u64,
    /// Timeout applied to every ledger and verifier call.
    pub step_timeout_secs: u64,
    /// How long a sent transaction may wait for its receipt. Must stay below
    /// `step_timeout_secs` so an unconfirmed transaction is recorded with its hash.
    pub receipt_timeout_secs: u64,
    /// Hooks that may be retried, as `Component.method` or `Component.method(types)`.
    /// `Component` is either the component owning the hook or the one the call is sent to,
    /// so `MarketFactory.setMainContract` names the hook that `FantasyPredictionMarket` sends
    /// to the factory. Every entry must name a hook of the plan.
    pub idempotent_hooks: Vec<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network_name: None,
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default rpc url is valid"),
            from: None,
            artifacts_dir: PathBuf::from("artifacts"),
            deployments_dir: PathBuf::from("deployments"),

            platform_fee_basis_points: 250,
            min_bet_amount: ether_units(1) / U256::from(100u64),
            max_bet_amount: ether_units(100),
            min_delay_seconds: 86_400,
            token_name: "Fantasy Sports Token".to_string(),
            token_symbol: "FST".to_string(),
            initial_supply: ether_units(1_000_000),
            reward_amount: ether_units(100_000),
            oracle_address_override: None,
            create_sample_market: false,
            sample_market_game_time: None,

            verifier_api_key: None,
            verifier_url: Url::parse(DEFAULT_VERIFIER_URL).expect("default verifier url is valid"),
            verify_concurrency: 4,
            verify_attempts: 3,

            max_deploy_attempts: 1,
            max_call_attempts: 3,
            retry_delay_secs: 5,
            step_timeout_secs: 300,
            receipt_timeout_secs: 240,
            idempotent_hooks: Vec::new(),
        }
    }
}

impl DeployConfig {
    /// Check the invariants the plan relies on.
    pub fn validate(&self) -> Result<(), DeployError> {
        let fail = |msg: String| Err(DeployError::Configuration(msg));

        if self.platform_fee_basis_points > MAX_BASIS_POINTS {
            return fail(format!(
                "platform_fee_basis_points must be at most {MAX_BASIS_POINTS}, got {}",
                self.platform_fee_basis_points
            ));
        }
        if self.min_bet_amount > self.max_bet_amount {
            return fail("min_bet_amount must not exceed max_bet_amount".to_string());
        }
        if self.token_name.trim().is_empty() || self.token_symbol.trim().is_empty() {
            return fail("token_name and token_symbol must not be empty".to_string());
        }
        if self.reward_amount > self.initial_supply {
            return fail("reward_amount must not exceed initial_supply".to_string());
        }
        if self.max_deploy_attempts == 0 || self.max_call_attempts == 0 || self.verify_attempts == 0
        {
            return fail("attempt bounds must be at least 1".to_string());
        }
        if self.verify_concurrency == 0 {
            return fail("verify_concurrency must be at least 1".to_string());
        }
        if self.step_timeout_secs == 0 {
            return fail("step_timeout_secs must be at least 1".to_string());
        }
        if self.receipt_timeout_secs == 0 || self.receipt_timeout_secs >= self.step_timeout_secs {
            return fail(format!(
                "receipt_timeout_secs must be between 1 and step_timeout_secs ({}), got {}",
                self.step_timeout_secs, self.receipt_timeout_secs
            ));
        }
        if self.oracle_address_override == Some(Address::ZERO) {
            return fail("oracle_address_override must not be the zero address".to_string());
        }

        Ok(())
    }

    /// Whether the hook `method`, owned by `owner` and sent to `target`, may be retried.
    pub fn is_idempotent_hook(&self, owner: &str, target: &str, method: &str) -> bool {
        self.idempotent_hooks
            .iter()
            .any(|entry| names_hook(entry, owner, target, method))
    }

    /// The first `idempotent_hooks` entry naming none of the hooks of `components`.
    pub fn unmatched_idempotent_hook(&self, components: &[ComponentSpec]) -> Option<&str> {
        self.idempotent_hooks
            .iter()
            .find(|entry| {
                !components.iter().any(|component| {
                    component.hooks.iter().any(|hook| {
                        names_hook(entry, &component.name, &hook.target, &hook.method)
                    })
                })
            })
            .map(String::as_str)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_deploy_attempts: self.max_deploy_attempts,
            max_call_attempts: self.max_call_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            concurrency: self.verify_concurrency,
            attempts: self.verify_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

/// Whether `entry` (`Component.method` or `Component.method(types)`) names a hook.
fn names_hook(entry: &str, owner: &str, target: &str, method: &str) -> bool {
    let bare = method.split('(').next().unwrap_or(method);
    entry
        .split_once('.')
        .is_some_and(|(component, name)| {
            (component == owner || component == target) && (name == method || name == bare)
        })
}

/// `n` whole units with 18 decimals.
fn ether_units(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// (De)serialize amounts as decimal ether strings, e.g. `"0.01"`.
mod ether {
    use alloy_core::primitives::{
        U256,
        utils::{format_ether, parse_ether},
    };
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(u64),
        Float(f64),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = format_ether(*value);
        if !formatted.contains('.') {
            return serializer.serialize_str(&formatted);
        }
        serializer.serialize_str(formatted.trim_end_matches('0').trim_end_matches('.'))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Int(value) => value.to_string(),
            Raw::Float(value) => value.to_string(),
        };
        parse_ether(text.trim())
            .map_err(|err| D::Error::custom(format!("invalid ether amount `{text}`: {err}")))
    }
}
