//! Integration tests for fantasy-deploy.
//!
//! The ledger and the verification service are replaced by in-memory stubs: the stub ledger
//! hands out incrementing addresses (`0x..01`, `0x..02`, ...) in submission order and can be
//! told to fail on a given submission.

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy_core::primitives::{Address, B256};
use fantasy_deploy::{
    CallReceipt, ComponentSpec, ContractArg, DeployConfig, DeployError, DeployReceipt, Executor,
    ExecutorConfig, LedgerClient, ManifestKey, ManifestStore, MinedTransaction, NetworkInfo, Plan,
    ResolutionContext, RunStatus, StepKind, SubmissionError, VerificationError,
    VerificationDriver, VerificationOutcome, VerificationTask, Verifier, VerifyConfig,
    fantasy_plan,
};
use tempdir::TempDir;
use tokio::sync::watch;

const SEPOLIA: u64 = 11155111;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Ledger stub counting submissions (deployments and calls).
struct StubLedger {
    chain_id: u64,
    submissions: AtomicUsize,
    deploys: AtomicUsize,
    fail_on: Option<usize>,
    cancel_after: Option<(usize, watch::Sender<bool>)>,
    deployed: Mutex<Vec<String>>,
}

impl StubLedger {
    fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            submissions: AtomicUsize::new(0),
            deploys: AtomicUsize::new(0),
            fail_on: None,
            cancel_after: None,
            deployed: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, submission: usize) -> Self {
        self.fail_on = Some(submission);
        self
    }

    fn cancelling_after(mut self, submission: usize, cancel: watch::Sender<bool>) -> Self {
        self.cancel_after = Some((submission, cancel));
        self
    }

    fn deployed(&self) -> Vec<String> {
        self.deployed.lock().unwrap().clone()
    }

    fn next_submission(&self) -> Result<usize, SubmissionError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, cancel)) = &self.cancel_after {
            if n == *after {
                let _ = cancel.send(true);
            }
        }
        if self.fail_on == Some(n) {
            return Err(SubmissionError::Rpc(format!("submission {n} rejected")));
        }
        Ok(n)
    }
}

impl LedgerClient for StubLedger {
    async fn deploy(
        &self,
        contract: &str,
        _args: &[ContractArg],
    ) -> Result<DeployReceipt, SubmissionError> {
        let n = self.next_submission()?;
        let index = self.deploys.fetch_add(1, Ordering::SeqCst) + 1;
        self.deployed.lock().unwrap().push(contract.to_string());
        Ok(DeployReceipt {
            address: Address::with_last_byte(index as u8),
            block_number: n as u64,
            tx_hash: None,
        })
    }

    async fn call(
        &self,
        _target: Address,
        _method: &str,
        _args: &[ContractArg],
    ) -> Result<CallReceipt, SubmissionError> {
        let n = self.next_submission()?;
        Ok(CallReceipt {
            block_number: n as u64,
            tx_hash: None,
        })
    }

    async fn transaction(
        &self,
        _tx_hash: B256,
    ) -> Result<Option<MinedTransaction>, SubmissionError> {
        Ok(None)
    }

    async fn current_account(&self) -> Result<Address, SubmissionError> {
        Ok(Address::with_last_byte(0xde))
    }

    async fn network_info(&self) -> Result<NetworkInfo, SubmissionError> {
        Ok(NetworkInfo::from_chain_id(self.chain_id, None))
    }

    async fn block_number(&self) -> Result<u64, SubmissionError> {
        Ok(self.submissions.load(Ordering::SeqCst) as u64)
    }
}

/// Oracle and Token have no dependencies, Factory needs the Oracle, Market needs all three.
fn market_plan() -> Plan {
    Plan::new(vec![
        ComponentSpec::new("Oracle", "SportsOracle"),
        ComponentSpec::new("Token", "FantasyToken"),
        ComponentSpec::new("Factory", "FantasyMarketFactory")
            .depends_on(["Oracle"])
            .args(|ctx| Ok(vec![ctx.address("Oracle")?.into()])),
        ComponentSpec::new("Market", "FantasyPredictionMarket")
            .depends_on(["Oracle", "Factory", "Token"])
            .args(|ctx| {
                Ok(vec![
                    ctx.address("Oracle")?.into(),
                    ctx.address("Factory")?.into(),
                    ctx.address("Token")?.into(),
                ])
            }),
    ])
    .unwrap()
}

fn chain_plan(len: usize) -> Plan {
    let components = (1..=len)
        .map(|i| {
            let spec = ComponentSpec::new(format!("C{i}"), format!("Contract{i}"));
            if i > 1 {
                spec.depends_on([format!("C{}", i - 1)])
            } else {
                spec
            }
        })
        .collect();
    Plan::new(components).unwrap()
}

fn executor() -> Executor {
    Executor::new(ExecutorConfig::default())
}

#[tokio::test]
async fn test_scenario_addresses_follow_deployment_order() {
    init_tracing();
    let ledger = StubLedger::new(31337);

    let record = executor()
        .execute(&market_plan(), &ledger, ResolutionContext::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let resolved: Vec<_> = record
        .components
        .iter()
        .map(|(name, component)| (name, component.address))
        .collect();
    assert_eq!(
        resolved,
        vec![
            ("Oracle", Address::with_last_byte(1)),
            ("Token", Address::with_last_byte(2)),
            ("Factory", Address::with_last_byte(3)),
            ("Market", Address::with_last_byte(4)),
        ]
    );

    let market = record.components.get("Market").unwrap();
    assert_eq!(
        market.constructor_args,
        vec![
            ContractArg::Address(Address::with_last_byte(1)),
            ContractArg::Address(Address::with_last_byte(3)),
            ContractArg::Address(Address::with_last_byte(2)),
        ]
    );
    assert_eq!(record.status, RunStatus::Complete);
    assert_eq!(record.deployer, Address::with_last_byte(0xde));
    assert_eq!(record.block_number, 4);
}

#[tokio::test]
async fn test_default_plan_deploys_dependencies_first() {
    let config = DeployConfig::default();
    let plan = fantasy_plan(&config).unwrap();
    let ledger = StubLedger::new(31337);

    let outcome = executor()
        .execute(&plan, &ledger, ResolutionContext::new())
        .await
        .unwrap();
    assert!(outcome.is_complete(), "{:?}", outcome.error);

    let deployed = ledger.deployed();
    let position = |contract: &str| deployed.iter().position(|c| c == contract).unwrap();
    for spec in plan.iter() {
        for dependency in &spec.dependencies {
            let dependency = &plan.get(dependency).unwrap().contract;
            assert!(
                position(dependency) < position(&spec.contract),
                "{dependency} must be deployed before {}",
                spec.contract
            );
        }
    }

    let wired: HashSet<_> = outcome
        .record
        .wiring
        .iter()
        .map(|record| record.hook.as_str())
        .collect();
    assert!(wired.contains("grantRole(bytes32,address)"));
    assert!(wired.contains("setMarketFactory(address)"));
    assert!(wired.contains("setMainContract(address)"));
    assert!(wired.contains("transfer(address,uint256)"));
}

#[tokio::test]
async fn test_failure_on_nth_submission_keeps_previous_components() {
    let dir = TempDir::new("fantasy-it").unwrap();
    let store = ManifestStore::new(dir.path());
    let ledger = StubLedger::new(SEPOLIA).failing_on(3);

    let outcome = executor()
        .execute(&chain_plan(5), &ledger, ResolutionContext::new())
        .await
        .unwrap();

    match &outcome.error {
        Some(DeployError::DeploymentFailed { component, cause }) => {
            assert_eq!(component, "C3");
            assert!(matches!(cause, SubmissionError::Rpc(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let key = outcome.record.key();
    store.persist(&outcome.record, &key).unwrap();
    let loaded = store.load(&key).unwrap().unwrap();

    let names: Vec<_> = loaded.components.names().collect();
    assert_eq!(names, vec!["C1", "C2"]);
    assert_eq!(loaded.status, RunStatus::Partial);
    let failure = loaded.failure.unwrap();
    assert_eq!(failure.component.as_deref(), Some("C3"));
    assert_eq!(failure.step, Some(StepKind::Deploy));
    assert!(failure.cause.contains("submission 3 rejected"));
}

#[tokio::test]
async fn test_resume_only_deploys_missing_components() {
    let plan = chain_plan(5);
    let first = StubLedger::new(SEPOLIA).failing_on(4);
    let partial = executor()
        .execute(&plan, &first, ResolutionContext::new())
        .await
        .unwrap()
        .record;
    assert_eq!(partial.components.len(), 3);

    let second = StubLedger::new(SEPOLIA);
    let resumed = executor()
        .resume(&plan, &second, &partial)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(second.deployed(), vec!["Contract4", "Contract5"]);
    assert_eq!(resumed.components.len(), 5);
    for (name, component) in partial.components.iter() {
        assert_eq!(resumed.components.get(name), Some(component));
    }
}

#[tokio::test]
async fn test_resume_on_another_chain_is_rejected() {
    let plan = chain_plan(2);
    let partial = executor()
        .execute(&plan, &StubLedger::new(SEPOLIA).failing_on(2), ResolutionContext::new())
        .await
        .unwrap()
        .record;

    let err = executor()
        .resume(&plan, &StubLedger::new(1), &partial)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
}

#[tokio::test]
async fn test_cancellation_stops_before_next_step() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ledger = StubLedger::new(SEPOLIA).cancelling_after(2, cancel_tx);

    let outcome = executor()
        .with_cancellation(cancel_rx)
        .execute(&chain_plan(4), &ledger, ResolutionContext::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.error,
        Some(DeployError::Cancelled { ref next_step }) if next_step == "deploy C3"
    ));
    assert_eq!(outcome.record.components.len(), 2);
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_checkpoint_is_written_after_each_step() {
    let dir = TempDir::new("fantasy-it").unwrap();
    let store = ManifestStore::new(dir.path().join("deployments"));
    let key = ManifestKey::for_network(&NetworkInfo::from_chain_id(SEPOLIA, None));
    let ledger = StubLedger::new(SEPOLIA).failing_on(3);

    let outcome = executor()
        .with_checkpoint(store.clone(), key.clone())
        .with_config_hash("abc")
        .execute(&chain_plan(4), &ledger, ResolutionContext::new())
        .await
        .unwrap();
    assert!(!outcome.is_complete());

    let checkpoint = store.load(&key).unwrap().unwrap();
    assert_eq!(checkpoint.status, RunStatus::Partial);
    assert_eq!(checkpoint.components.len(), 2);
    assert_eq!(checkpoint.config_hash.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_unresolved_argument_is_reported() {
    let plan = Plan::new(vec![
        ComponentSpec::new("Market", "Market").args(|ctx| Ok(vec![ctx.address("Oracle")?.into()])),
        ComponentSpec::new("Oracle", "Oracle"),
    ])
    .unwrap();
    let ledger = StubLedger::new(SEPOLIA);

    let outcome = executor()
        .execute(&plan, &ledger, ResolutionContext::new())
        .await
        .unwrap();

    match outcome.error {
        Some(DeployError::DependencyUnresolved {
            component,
            dependency,
        }) => {
            assert_eq!(component, "Market");
            assert_eq!(dependency, "Oracle");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(ledger.deployed().is_empty());
}

#[test]
fn test_cyclic_plan_is_rejected() {
    let err = Plan::new(vec![
        ComponentSpec::new("A", "A").depends_on(["C"]),
        ComponentSpec::new("B", "B").depends_on(["A"]),
        ComponentSpec::new("C", "C").depends_on(["B"]),
    ])
    .unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
}

/// Fails for exactly one component.
struct RejectingVerifier {
    reject: &'static str,
    submitted: Mutex<Vec<String>>,
}

impl Verifier for RejectingVerifier {
    async fn submit(&self, task: &VerificationTask) -> Result<(), VerificationError> {
        self.submitted.lock().unwrap().push(task.component.clone());
        if task.component == self.reject {
            return Err(VerificationError::Rejected(
                "bytecode does not match".to_string(),
            ));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_one_verification_failure_is_isolated() {
    let record = executor()
        .execute(&chain_plan(5), &StubLedger::new(SEPOLIA), ResolutionContext::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let verifier = RejectingVerifier {
        reject: "C3",
        submitted: Mutex::new(Vec::new()),
    };
    let report = VerificationDriver::new(VerifyConfig::default())
        .verify_all(&record, &verifier)
        .await;

    assert_eq!(report.verified(), 4);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.get("C3"),
        Some(VerificationOutcome::Failed(reason)) if reason.contains("bytecode does not match")
    ));

    // Rejections are final, so every component was submitted exactly once.
    assert_eq!(verifier.submitted.lock().unwrap().len(), 5);
    let order: Vec<_> = report.entries().iter().map(|e| e.component.as_str()).collect();
    assert_eq!(order, vec!["C1", "C2", "C3", "C4", "C5"]);
}
