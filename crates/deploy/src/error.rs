//! Error taxonomy for deployment runs.
//!
//! Plan-level errors ([`DeployError::Configuration`], [`DeployError::UnknownDependency`]) are
//! raised before anything touches the ledger. Ledger failures surface as [`SubmissionError`]
//! and are wrapped into the step that produced them. Verification failures never abort a run
//! and only show up in the verification report.

use std::time::Duration;

use alloy_core::primitives::B256;
use thiserror::Error;

/// A failed call against the ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The node rejected the request or answered with something unusable.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The transaction was mined but reverted.
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
    /// The call did not complete within the step timeout. A transaction may have been sent.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The transaction was sent but its outcome is unknown.
    #[error("transaction {tx_hash} was sent but not confirmed: {cause}")]
    Unconfirmed { tx_hash: B256, cause: String },
    /// The deployable unit could not be loaded.
    #[error("artifact error: {0}")]
    Artifact(String),
}

impl SubmissionError {
    /// Flatten an `anyhow` error chain into an [`SubmissionError::Rpc`].
    pub fn rpc(err: anyhow::Error) -> Self {
        Self::Rpc(format!("{err:#}"))
    }

    /// Only failures that happened before anything reached the node are retried. Reverts and
    /// broken artifacts fail the same way on every attempt, and a timed out or unconfirmed
    /// transaction may still be mined.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// The transaction that was sent without a known outcome.
    pub fn pending_tx(&self) -> Option<B256> {
        match self {
            Self::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// A constructor or hook argument referenced a component that is not in the context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("component `{0}` is not resolved")]
pub struct MissingComponent(pub String);

/// Fatal errors of the orchestration core.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The plan or the configuration is invalid. Nothing was attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A component depends on a name that is not part of the plan.
    #[error("component `{component}` depends on unknown component `{dependency}`")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    /// Arguments referenced a component that has not been deployed yet.
    #[error("component `{component}` references `{dependency}` which is not deployed")]
    DependencyUnresolved {
        component: String,
        dependency: String,
    },

    /// The deployment transaction of a component failed.
    #[error("deployment of `{component}` failed")]
    DeploymentFailed {
        component: String,
        #[source]
        cause: SubmissionError,
    },

    /// A post-deployment wiring call failed.
    #[error("wiring hook `{hook}` of `{component}` failed")]
    WiringFailed {
        component: String,
        hook: String,
        #[source]
        cause: SubmissionError,
    },

    /// The run was cancelled before the named step started.
    #[error("run cancelled before step `{next_step}`")]
    Cancelled { next_step: String },

    /// Querying run metadata (account, network, block) failed before any step ran.
    #[error("failed to query the ledger")]
    Ledger(#[source] SubmissionError),
}

impl DeployError {
    /// The component the error is attributed to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::UnknownDependency { component, .. }
            | Self::DependencyUnresolved { component, .. }
            | Self::DeploymentFailed { component, .. }
            | Self::WiringFailed { component, .. } => Some(component),
            _ => None,
        }
    }

    /// The ledger failure behind a failed step.
    pub fn submission(&self) -> Option<&SubmissionError> {
        match self {
            Self::DeploymentFailed { cause, .. } | Self::WiringFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Render an error followed by its sources, `outer: inner: root`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Per-component verification failure. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The verification service answered and refused the submission.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The request to the verification service failed.
    #[error("request failed: {0}")]
    Request(String),
    /// No answer within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Sources or compiler metadata for the component could not be loaded.
    #[error("artifact error: {0}")]
    Artifact(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_attribution() {
        let err = DeployError::WiringFailed {
            component: "FantasyPredictionMarket".to_string(),
            hook: "setMarketFactory(address)".to_string(),
            cause: SubmissionError::Reverted {
                tx_hash: "0xabc".to_string(),
            },
        };
        assert_eq!(err.component(), Some("FantasyPredictionMarket"));
        assert!(DeployError::Configuration("cycle".into()).component().is_none());
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let err = DeployError::DeploymentFailed {
            component: "FantasyToken".to_string(),
            cause: SubmissionError::Timeout(Duration::from_secs(3)),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("timed out after 3s"));
        assert_eq!(err.to_string(), "deployment of `FantasyToken` failed");
    }

    #[test]
    fn test_error_chain_names_component_and_cause() {
        let err = DeployError::DeploymentFailed {
            component: "MarketFactory".to_string(),
            cause: SubmissionError::Rpc("insufficient funds".to_string()),
        };
        assert_eq!(
            error_chain(&err),
            "deployment of `MarketFactory` failed: rpc error: insufficient funds"
        );
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(SubmissionError::Rpc("nonce too low".into()).is_retryable());
        assert!(!SubmissionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SubmissionError::Artifact("missing".into()).is_retryable());
        assert!(
            !SubmissionError::Reverted {
                tx_hash: "0x01".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_unconfirmed_transaction_is_final() {
        let tx_hash = B256::repeat_byte(0x42);
        let err = DeployError::DeploymentFailed {
            component: "FantasyToken".to_string(),
            cause: SubmissionError::Unconfirmed {
                tx_hash,
                cause: "connection reset".to_string(),
            },
        };
        let cause = err.submission().unwrap();
        assert!(!cause.is_retryable());
        assert_eq!(cause.pending_tx(), Some(tx_hash));
        assert!(error_chain(&err).contains("connection reset"));
        assert!(DeployError::Configuration("x".into()).submission().is_none());
    }
}
