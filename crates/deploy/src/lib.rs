//! fantasy-deploy - Deployment orchestration for the Fantasy Sports prediction market.
//!
//! A validated [`Plan`] of interdependent components is executed against a [`LedgerClient`] in
//! dependency order. The outcome is a [`RunRecord`] that is persisted per network by the
//! [`ManifestStore`], can be resumed after a failure, and feeds source verification through
//! the [`VerificationDriver`].

mod args;
pub use args::{ContractArg, encode_args, encode_call, role_id, selector};

mod artifacts;
pub use artifacts::{Artifacts, BuildInfo, ContractArtifact};

mod config;
pub use config::{CONFIG_FILENAME, DEFAULT_RPC_URL, DEFAULT_VERIFIER_URL, DeployConfig};

pub mod context;
pub use context::{ComponentMap, DeployedComponent, ResolutionContext, WiringRecord};

pub mod error;
pub use error::{DeployError, MissingComponent, SubmissionError, VerificationError};

mod executor;
pub use executor::{Executor, ExecutorConfig, RunOutcome, Step, StepKind};

mod fingerprint;
pub use fingerprint::DeploymentFingerprint;

mod fs;
pub use fs::{FileLock, FsHandler};

pub mod ledger;
pub use ledger::{
    CallReceipt, DeployReceipt, KnownChain, LedgerClient, MinedTransaction, NetworkInfo, RpcLedger,
};

pub mod manifest;
pub use manifest::{
    FailureRecord, MANIFEST_VERSION, ManifestKey, ManifestStore, RunRecord, RunStatus,
};

pub mod plan;
pub use plan::{ComponentSpec, HookSpec, Plan, fantasy_plan};

mod rpc;

pub mod verify;
pub use verify::{
    EtherscanVerifier, SkipReason, VerificationDriver, VerificationOutcome, VerificationReport,
    VerificationTask, Verifier, VerifyConfig,
};
