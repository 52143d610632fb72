use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fantasy_deploy::{CONFIG_FILENAME, DeployConfig};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Serialize;
use tracing::level_filters::LevelFilter;

/// Prefix of the environment variables overriding configuration keys.
const ENV_PREFIX: &str = "FANTASY_";

#[derive(Parser)]
#[command(name = "fantasy")]
#[command(
    author,
    version,
    about = "Deploy and wire the Fantasy Sports prediction market contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "FANTASY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. Missing files are ignored.
    #[arg(short, long, global = true, alias = "conf", env = "FANTASY_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[clap(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Deploy the contracts, then verify them (default).
    Deploy(DeployArgs),
    /// Verify the contracts of a stored deployment.
    Verify(ManifestArgs),
    /// Print a stored deployment.
    Status(ManifestArgs),
    /// Write the effective configuration to the configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct DeployArgs {
    /// Continue the stored deployment of this network, skipping what it already contains.
    #[arg(long, conflicts_with = "fresh")]
    pub resume: bool,

    /// Start a new deployment even if one is stored for this network.
    #[arg(long)]
    pub fresh: bool,

    /// Do not submit the deployed contracts for verification.
    #[arg(long)]
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ManifestArgs {
    /// Read this manifest instead of the one of the connected network.
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

/// Flags overriding the configuration file and the environment.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct ConfigOverrides {
    /// JSON-RPC endpoint of the node.
    #[arg(long, global = true, alias = "rpc")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,

    /// Override the network name detected from the chain id.
    #[arg(long, global = true, alias = "network")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,

    /// Sender account (must be managed by the node).
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Directory holding the compiled artifacts.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory where manifests are written.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployments_dir: Option<PathBuf>,

    /// Use an already deployed oracle.
    #[arg(long, global = true, alias = "oracle")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_address_override: Option<Address>,
}

impl Cli {
    /// Layer defaults, the configuration file, `FANTASY_*` variables and flags, in that order.
    pub fn load_config(&self) -> anyhow::Result<DeployConfig> {
        load_config(&self.config, &self.overrides, Env::prefixed(ENV_PREFIX))
    }
}

fn load_config(path: &Path, overrides: &ConfigOverrides, env: Env) -> anyhow::Result<DeployConfig> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "Loading configuration file");
    }

    let config: DeployConfig = Figment::from(Serialized::defaults(DeployConfig::default()))
        .merge(Toml::file(path))
        .merge(env.ignore(&["verbosity", "config"]))
        .merge(Serialized::defaults(overrides))
        .extract()
        .with_context(|| format!("Invalid configuration ({})", path.display()))?;

    config.validate()?;
    Ok(config)
}
