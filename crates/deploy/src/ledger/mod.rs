//! Ledger client capability consumed by the executor.
//!
//! The executor only ever talks to the ledger through [`LedgerClient`]. [`RpcLedger`] is the
//! JSON-RPC implementation used by the CLI; tests substitute in-memory stubs.

mod node;

pub use node::RpcLedger;

use std::future::Future;

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::{ContractArg, SubmissionError};

/// Result of a mined deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: Option<B256>,
}

/// Result of a mined call transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReceipt {
    pub block_number: u64,
    pub tx_hash: Option<B256>,
}

/// A previously sent transaction, as found on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedTransaction {
    pub block_number: u64,
    /// Set when the transaction created a contract.
    pub contract_address: Option<Address>,
    pub succeeded: bool,
}

/// Submits transactions and answers run metadata queries.
///
/// Every method suspends until the node confirms; callers bound each call with a timeout.
pub trait LedgerClient: Send + Sync {
    /// Deploy the unit named `contract` with the given constructor arguments.
    fn deploy(
        &self,
        contract: &str,
        args: &[ContractArg],
    ) -> impl Future<Output = Result<DeployReceipt, SubmissionError>> + Send;

    /// Send a state-mutating call to `target`. `method` is a function signature.
    fn call(
        &self,
        target: Address,
        method: &str,
        args: &[ContractArg],
    ) -> impl Future<Output = Result<CallReceipt, SubmissionError>> + Send;

    /// Look up a transaction sent earlier. `None` while it is not mined.
    fn transaction(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<MinedTransaction>, SubmissionError>> + Send;

    /// The account every transaction of the run is sent from.
    fn current_account(&self) -> impl Future<Output = Result<Address, SubmissionError>> + Send;

    fn network_info(&self) -> impl Future<Output = Result<NetworkInfo, SubmissionError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, SubmissionError>> + Send;
}

/// Chains with a well-known name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum KnownChain {
    Mainnet,
    Sepolia,
    Holesky,
    Optimism,
    Base,
    Arbitrum,
    Polygon,
    Localhost,
}

impl KnownChain {
    pub fn chain_id(&self) -> u64 {
        match self {
            KnownChain::Mainnet => 1,
            KnownChain::Sepolia => 11155111,
            KnownChain::Holesky => 17000,
            KnownChain::Optimism => 10,
            KnownChain::Base => 8453,
            KnownChain::Arbitrum => 42161,
            KnownChain::Polygon => 137,
            KnownChain::Localhost => 31337,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        use strum::IntoEnumIterator;

        // Ganache and older dev nodes default to 1337.
        if chain_id == 1337 {
            return Some(KnownChain::Localhost);
        }
        KnownChain::iter().find(|chain| chain.chain_id() == chain_id)
    }
}

/// Identity of the network a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u64,
}

/// Network names used by local development nodes.
const LOCAL_NETWORK_NAMES: &[&str] = &["localhost", "hardhat", "anvil", "ganache"];

impl NetworkInfo {
    /// Name a network from its chain id, unless a name is forced.
    pub fn from_chain_id(chain_id: u64, name_override: Option<&str>) -> Self {
        let name = match name_override {
            Some(name) => name.to_string(),
            None => KnownChain::from_chain_id(chain_id)
                .map(|chain| chain.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        Self { name, chain_id }
    }

    /// Local or ephemeral networks are never submitted for verification.
    pub fn is_local(&self) -> bool {
        KnownChain::from_chain_id(self.chain_id) == Some(KnownChain::Localhost)
            || LOCAL_NETWORK_NAMES.contains(&self.name.as_str())
    }
}
