//! Source verification of a completed run.
//!
//! Every component is verified independently. A failure is recorded in the report and never
//! cancels its siblings. Submissions run concurrently up to a bound; the report keeps
//! deployment order.

mod etherscan;

pub use etherscan::EtherscanVerifier;

use std::{fmt, future::Future, time::Duration};

use alloy_core::primitives::Address;
use backon::{ConstantBuilder, Retryable};
use futures::{StreamExt, stream};
use serde::Serialize;

use crate::{ContractArg, VerificationError, manifest::RunRecord};

/// Verification work for one deployed component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTask {
    pub component: String,
    /// Deployable unit, used to locate sources and compiler settings.
    pub contract: String,
    pub address: Address,
    pub constructor_args: Vec<ContractArg>,
}

/// Verification service.
pub trait Verifier: Send + Sync {
    fn submit(
        &self,
        task: &VerificationTask,
    ) -> impl Future<Output = Result<(), VerificationError>> + Send;

    /// Whether credentials are available. Unconfigured verifiers skip the whole run.
    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Maximum number of submissions in flight.
    pub concurrency: usize,
    /// Attempts per component for transient failures.
    pub attempts: usize,
    pub retry_delay: Duration,
    /// Upper bound of a single attempt, polling included.
    pub timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            attempts: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Local network or missing credentials.
    NotApplicable(String),
    /// Supplied by configuration, not deployed by this tool.
    External,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotApplicable(detail) => write!(f, "not applicable ({detail})"),
            SkipReason::External => f.write_str("external"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Failed(String),
    Skipped(SkipReason),
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Verified => f.write_str("verified"),
            VerificationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            VerificationOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub component: String,
    pub address: Address,
    pub outcome: VerificationOutcome,
}

/// Per-component verification result, in deployment order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    entries: Vec<ReportEntry>,
}

impl VerificationReport {
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn get(&self, component: &str) -> Option<&VerificationOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.component == component)
            .map(|entry| &entry.outcome)
    }

    pub fn verified(&self) -> usize {
        self.count(|outcome| matches!(outcome, VerificationOutcome::Verified))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, VerificationOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, VerificationOutcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&VerificationOutcome) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.outcome))
            .count()
    }
}

/// Submits every component of a record to a [`Verifier`].
#[derive(Debug, Clone, Default)]
pub struct VerificationDriver {
    config: VerifyConfig,
}

impl VerificationDriver {
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    /// Verify every component of `record`. Never fails: problems end up in the report.
    pub async fn verify_all<V: Verifier>(
        &self,
        record: &RunRecord,
        verifier: &V,
    ) -> VerificationReport {
        let not_applicable = if record.network.is_local() {
            Some(format!("local network `{}`", record.network.name))
        } else if !verifier.is_configured() {
            Some("no verifier credentials".to_string())
        } else {
            None
        };

        if let Some(detail) = not_applicable {
            tracing::info!(reason = %detail, "Skipping verification");
            let entries = record
                .components
                .iter()
                .map(|(name, component)| ReportEntry {
                    component: name.to_string(),
                    address: component.address,
                    outcome: VerificationOutcome::Skipped(SkipReason::NotApplicable(
                        detail.clone(),
                    )),
                })
                .collect();
            return VerificationReport { entries };
        }

        tracing::info!(
            components = record.components.len(),
            concurrency = self.config.concurrency,
            "Verifying deployed components"
        );

        let entries = stream::iter(record.components.iter())
            .map(|(name, component)| async move {
                let outcome = if component.external {
                    VerificationOutcome::Skipped(SkipReason::External)
                } else {
                    let task = VerificationTask {
                        component: name.to_string(),
                        contract: component.contract.clone(),
                        address: component.address,
                        constructor_args: component.constructor_args.clone(),
                    };
                    self.verify_one(&task, verifier).await
                };
                ReportEntry {
                    component: name.to_string(),
                    address: component.address,
                    outcome,
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let report = VerificationReport { entries };
        tracing::info!(
            verified = report.verified(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Verification finished"
        );
        report
    }

    async fn verify_one<V: Verifier>(
        &self,
        task: &VerificationTask,
        verifier: &V,
    ) -> VerificationOutcome {
        let timeout = self.config.timeout;
        let attempt = move || async move {
            match tokio::time::timeout(timeout, verifier.submit(task)).await {
                Ok(result) => result,
                Err(_) => Err(VerificationError::Timeout(timeout)),
            }
        };

        let backoff = ConstantBuilder::default()
            .with_delay(self.config.retry_delay)
            .with_max_times(self.config.attempts.saturating_sub(1));

        let result = attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|err: &VerificationError| {
                matches!(
                    err,
                    VerificationError::Request(_) | VerificationError::Timeout(_)
                )
            })
            .notify(|err: &VerificationError, delay: Duration| {
                tracing::debug!(component = %task.component, error = %err, ?delay, "Verification attempt failed, retrying");
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(component = %task.component, address = %task.address, "Verified");
                VerificationOutcome::Verified
            }
            Err(err) => {
                tracing::warn!(component = %task.component, error = %err, "Verification failed");
                VerificationOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        NetworkInfo, ResolutionContext,
        context::DeployedComponent,
        manifest::RunRecord,
    };

    struct FlakyVerifier {
        transient_failures: Mutex<usize>,
        configured: bool,
    }

    impl Verifier for FlakyVerifier {
        async fn submit(&self, _task: &VerificationTask) -> Result<(), VerificationError> {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(VerificationError::Request("503".to_string()));
            }
            Ok(())
        }

        fn is_configured(&self) -> bool {
            self.configured
        }
    }

    fn record(chain_id: u64) -> RunRecord {
        let mut ctx = ResolutionContext::new();
        ctx.record(
            "SportsOracle",
            DeployedComponent {
                contract: "SportsOracle".to_string(),
                address: Address::with_last_byte(1),
                block_number: None,
                tx_hash: None,
                constructor_args: vec![],
                external: true,
            },
        );
        ctx.record(
            "FantasyToken",
            DeployedComponent {
                contract: "FantasyToken".to_string(),
                address: Address::with_last_byte(2),
                block_number: Some(3),
                tx_hash: None,
                constructor_args: vec!["Fantasy Sports Token".into()],
                external: false,
            },
        );
        RunRecord::snapshot(
            &ctx,
            NetworkInfo::from_chain_id(chain_id, None),
            Address::with_last_byte(0xde),
            3,
            None,
            None,
        )
    }

    fn driver() -> VerificationDriver {
        VerificationDriver::new(VerifyConfig {
            retry_delay: Duration::from_millis(5),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_and_external_skipped() {
        let verifier = FlakyVerifier {
            transient_failures: Mutex::new(1),
            configured: true,
        };
        let report = driver().verify_all(&record(11155111), &verifier).await;

        assert_eq!(
            report.get("SportsOracle"),
            Some(&VerificationOutcome::Skipped(SkipReason::External))
        );
        assert_eq!(
            report.get("FantasyToken"),
            Some(&VerificationOutcome::Verified)
        );
    }

    #[tokio::test]
    async fn test_local_network_is_not_applicable() {
        let verifier = FlakyVerifier {
            transient_failures: Mutex::new(0),
            configured: true,
        };
        let report = driver().verify_all(&record(31337), &verifier).await;
        assert_eq!(report.skipped(), 2);
        assert!(matches!(
            report.get("FantasyToken"),
            Some(VerificationOutcome::Skipped(SkipReason::NotApplicable(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_everything() {
        let verifier = FlakyVerifier {
            transient_failures: Mutex::new(0),
            configured: false,
        };
        let report = driver().verify_all(&record(11155111), &verifier).await;
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.verified(), 0);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            VerificationOutcome::Failed("bad bytecode".into()).to_string(),
            "failed: bad bytecode"
        );
        assert_eq!(
            VerificationOutcome::Skipped(SkipReason::External).to_string(),
            "skipped: external"
        );
    }
}
