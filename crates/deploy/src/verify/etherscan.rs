//! Etherscan-compatible verification API (v2, multichain).

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::{VerificationTask, Verifier};
use crate::{Artifacts, VerificationError, args::encode_args, rpc};

/// Etherscan response envelope. `result` holds either a GUID or a status message.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: String,
}

impl ApiResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }

    fn already_verified(&self) -> bool {
        self.result.to_ascii_lowercase().contains("already verified")
    }

    fn is_pending(&self) -> bool {
        self.result.to_ascii_lowercase().contains("pending")
    }

    fn detail(&self) -> String {
        if self.result.is_empty() {
            self.message.clone()
        } else {
            self.result.clone()
        }
    }
}

/// Verifier submitting standard-JSON input to an Etherscan-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    chain_id: u64,
    artifacts: Artifacts,
    poll_interval: Duration,
}

impl EtherscanVerifier {
    pub fn new(
        url: Url,
        api_key: Option<String>,
        chain_id: u64,
        artifacts: Artifacts,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
            api_key,
            chain_id,
            artifacts,
            poll_interval: Duration::from_secs(5),
        })
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn api_key(&self) -> Result<&str, VerificationError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| VerificationError::Request("no API key configured".to_string()))
    }

    /// Send the sources. Returns the GUID to poll, or `None` if the contract is already verified.
    async fn submit_sources(
        &self,
        task: &VerificationTask,
    ) -> Result<Option<String>, VerificationError> {
        let artifact = self
            .artifacts
            .load(&task.contract)
            .map_err(|err| VerificationError::Artifact(format!("{err:#}")))?;
        let build_info = self
            .artifacts
            .build_info(&task.contract)
            .map_err(|err| VerificationError::Artifact(format!("{err:#}")))?;

        let source_code = serde_json::to_string(&build_info.input)
            .map_err(|err| VerificationError::Artifact(err.to_string()))?;
        let contract_name = format!("{}:{}", artifact.source_name, artifact.contract_name);
        let compiler_version = format!("v{}", build_info.solc_long_version);
        let constructor_args = hex::encode(encode_args(&task.constructor_args));
        let address = task.address.to_string();
        let chain_id = self.chain_id.to_string();

        let form = [
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source_code.as_str()),
            ("codeformat", "solidity-standard-json-input"),
            ("contractname", contract_name.as_str()),
            ("compilerversion", compiler_version.as_str()),
            // Misspelled by the API.
            ("constructorArguements", constructor_args.as_str()),
        ];

        tracing::debug!(
            component = %task.component,
            contract = %contract_name,
            compiler = %compiler_version,
            "Submitting sources"
        );

        let response: ApiResponse = self
            .client
            .post(self.url.clone())
            .query(&[("chainid", chain_id.as_str()), ("apikey", self.api_key()?)])
            .form(&form)
            .send()
            .await
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        if response.already_verified() {
            return Ok(None);
        }
        if !response.is_ok() {
            return Err(VerificationError::Rejected(response.detail()));
        }
        Ok(Some(response.result))
    }

    async fn check_status(&self, guid: &str) -> Result<Option<()>, VerificationError> {
        let chain_id = self.chain_id.to_string();
        let response: ApiResponse = self
            .client
            .get(self.url.clone())
            .query(&[
                ("chainid", chain_id.as_str()),
                ("apikey", self.api_key()?),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        if response.is_ok() || response.already_verified() {
            return Ok(Some(()));
        }
        if response.is_pending() {
            return Ok(None);
        }
        Err(VerificationError::Rejected(response.detail()))
    }
}

fn request_error(err: reqwest::Error) -> VerificationError {
    VerificationError::Request(err.to_string())
}

impl Verifier for EtherscanVerifier {
    async fn submit(&self, task: &VerificationTask) -> Result<(), VerificationError> {
        let Some(guid) = self.submit_sources(task).await? else {
            tracing::info!(component = %task.component, "Already verified");
            return Ok(());
        };

        tracing::debug!(component = %task.component, guid = %guid, "Waiting for verification");
        rpc::poll_until(self.poll_interval, || self.check_status(&guid)).await
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: &str, result: &str) -> ApiResponse {
        serde_json::from_value(serde_json::json!({
            "status": status,
            "message": if status == "1" { "OK" } else { "NOTOK" },
            "result": result,
        }))
        .unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(response("1", "Pass - Verified").is_ok());
        assert!(response("0", "Contract source code already verified").already_verified());
        assert!(response("0", "Pending in queue").is_pending());

        let rejected = response("0", "Fail - Unable to verify");
        assert!(!rejected.is_ok() && !rejected.is_pending() && !rejected.already_verified());
        assert_eq!(rejected.detail(), "Fail - Unable to verify");
    }

    #[test]
    fn test_detail_falls_back_to_message() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"status":"0","message":"Invalid API Key"}"#).unwrap();
        assert_eq!(response.detail(), "Invalid API Key");
    }

    #[test]
    fn test_configured_only_with_key() {
        let url = Url::parse(crate::config::DEFAULT_VERIFIER_URL).unwrap();
        let artifacts = Artifacts::new("artifacts");
        let without = EtherscanVerifier::new(url.clone(), None, 1, artifacts.clone()).unwrap();
        let empty =
            EtherscanVerifier::new(url.clone(), Some(String::new()), 1, artifacts.clone()).unwrap();
        let with = EtherscanVerifier::new(url, Some("KEY".into()), 1, artifacts).unwrap();
        assert!(!without.is_configured());
        assert!(!empty.is_configured());
        assert!(with.is_configured());
    }
}
