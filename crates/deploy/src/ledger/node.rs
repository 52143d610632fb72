//! JSON-RPC ledger client backed by a node-managed account.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{CallReceipt, DeployReceipt, LedgerClient, MinedTransaction, NetworkInfo};
use crate::{
    Artifacts, ContractArg, SubmissionError,
    args::{encode_args, encode_call},
    rpc,
};

/// The subset of a transaction receipt the executor needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: B256,
    block_number: U64,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    status: Option<U64>,
}

impl TransactionReceipt {
    fn succeeded(&self) -> bool {
        self.status != Some(U64::ZERO)
    }
}

/// How long to wait for a receipt once a transaction is sent.
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(240);

/// Ledger client sending `eth_sendTransaction` from an account unlocked on the node.
///
/// Local development nodes and signing proxies expose such accounts.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: Url,
    from: Address,
    artifacts: Artifacts,
    network_name: Option<String>,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcLedger {
    /// Connect to `url`. Without `from`, the first account of `eth_accounts` is used.
    pub async fn connect(
        url: Url,
        from: Option<Address>,
        artifacts: Artifacts,
        network_name: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = rpc::create_client()?;

        let from = match from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    rpc::json_rpc_call(&client, url.as_str(), "eth_accounts", vec![])
                        .await
                        .context("Failed to list node accounts")?;
                accounts
                    .first()
                    .copied()
                    .context("The node manages no accounts; pass an explicit sender")?
            }
        };

        tracing::debug!(rpc_url = %url, from = %from, "Connected to ledger node");

        Ok(Self {
            client,
            url,
            from,
            artifacts,
            network_name,
            poll_interval: rpc::DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    /// Override the receipt polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound the wait for a receipt. Keep it below the executor step timeout so an
    /// unconfirmed transaction is reported with its hash.
    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, SubmissionError> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params)
            .await
            .map_err(SubmissionError::rpc)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>, SubmissionError> {
        self.request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
    }

    /// Send a transaction and wait until it is mined successfully.
    ///
    /// Once the node has accepted the transaction, every failure is reported as
    /// [`SubmissionError::Unconfirmed`] so it is never sent twice.
    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
    ) -> Result<TransactionReceipt, SubmissionError> {
        let mut tx = serde_json::json!({
            "from": self.from,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }

        let tx_hash: B256 = self.request("eth_sendTransaction", vec![tx]).await?;
        tracing::debug!(tx_hash = %tx_hash, "Transaction submitted, waiting for receipt...");

        let receipt = tokio::time::timeout(
            self.receipt_timeout,
            rpc::poll_until(self.poll_interval, || self.receipt(tx_hash)),
        )
        .await
        .map_err(|_| unconfirmed(tx_hash, format!("no receipt after {:?}", self.receipt_timeout)))?
        .map_err(|err| unconfirmed(tx_hash, err.to_string()))?;

        if !receipt.succeeded() {
            return Err(SubmissionError::Reverted {
                tx_hash: receipt.transaction_hash.to_string(),
            });
        }

        Ok(receipt)
    }
}

fn unconfirmed(tx_hash: B256, cause: String) -> SubmissionError {
    tracing::warn!(tx_hash = %tx_hash, cause = %cause, "Transaction outcome unknown");
    SubmissionError::Unconfirmed { tx_hash, cause }
}

impl LedgerClient for RpcLedger {
    async fn deploy(
        &self,
        contract: &str,
        args: &[ContractArg],
    ) -> Result<DeployReceipt, SubmissionError> {
        let artifact = self
            .artifacts
            .load(contract)
            .map_err(|err| SubmissionError::Artifact(format!("{err:#}")))?;

        let mut data = artifact.bytecode.to_vec();
        data.extend(encode_args(args));

        let receipt = self.send_transaction(None, Bytes::from(data)).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            unconfirmed(
                receipt.transaction_hash,
                "receipt has no contract address".to_string(),
            )
        })?;

        Ok(DeployReceipt {
            address,
            block_number: receipt.block_number.to::<u64>(),
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    async fn call(
        &self,
        target: Address,
        method: &str,
        args: &[ContractArg],
    ) -> Result<CallReceipt, SubmissionError> {
        let receipt = self
            .send_transaction(Some(target), encode_call(method, args))
            .await?;

        Ok(CallReceipt {
            block_number: receipt.block_number.to::<u64>(),
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    async fn transaction(&self, tx_hash: B256) -> Result<Option<MinedTransaction>, SubmissionError> {
        Ok(self.receipt(tx_hash).await?.map(|receipt| MinedTransaction {
            block_number: receipt.block_number.to::<u64>(),
            contract_address: receipt.contract_address,
            succeeded: receipt.succeeded(),
        }))
    }

    async fn current_account(&self) -> Result<Address, SubmissionError> {
        Ok(self.from)
    }

    async fn network_info(&self) -> Result<NetworkInfo, SubmissionError> {
        let chain_id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(NetworkInfo::from_chain_id(
            chain_id.to::<u64>(),
            self.network_name.as_deref(),
        ))
    }

    async fn block_number(&self) -> Result<u64, SubmissionError> {
        let block: U64 = self.request("eth_blockNumber", vec![]).await?;
        Ok(block.to::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_parsing() {
        let receipt: TransactionReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1b4",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x1",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        assert_eq!(receipt.block_number.to::<u64>(), 436);
        assert!(receipt.contract_address.is_some());
        assert_eq!(receipt.status, Some(U64::from(1u64)));
    }

    #[test]
    fn test_call_receipt_without_contract_address() {
        let receipt: TransactionReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "blockNumber": "0x2",
            "contractAddress": null,
            "status": "0x0"
        }))
        .unwrap();

        assert!(receipt.contract_address.is_none());
        assert_eq!(receipt.status, Some(U64::ZERO));
        assert!(!receipt.succeeded());
    }

    #[test]
    fn test_failure_after_send_keeps_hash() {
        let tx_hash = B256::repeat_byte(0x11);
        let err = unconfirmed(tx_hash, "connection reset".to_string());
        assert_eq!(err.pending_tx(), Some(tx_hash));
        assert!(!err.is_retryable());
    }
}
