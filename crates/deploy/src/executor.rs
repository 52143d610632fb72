//! Sequential execution of a deployment plan.
//!
//! The plan is flattened into an explicit list of [`Step`]s. Steps run strictly one after the
//! other from a single account so nonces are never raced. A failing step stops the run; what
//! succeeded before it is returned as a partial [`RunRecord`] so the caller can persist it and
//! resume later.

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use backon::{ConstantBuilder, Retryable};
use tokio::sync::watch;

use crate::{
    DeployError, LedgerClient, NetworkInfo, Plan, ResolutionContext, SubmissionError,
    context::{DeployedComponent, WiringRecord},
    error::{MissingComponent, error_chain},
    manifest::{FailureRecord, ManifestKey, ManifestStore, RunRecord, RunStatus},
    plan::{ComponentSpec, HookSpec},
};

/// Retry and timeout policy of the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Attempts per deployment. Deployments are not idempotent, so the default is one.
    pub max_deploy_attempts: usize,
    /// Attempts per wiring call marked idempotent. Other hooks get a single attempt.
    pub max_call_attempts: usize,
    pub retry_delay: Duration,
    /// Upper bound of every ledger call.
    pub step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_deploy_attempts: 1,
            max_call_attempts: 3,
            retry_delay: Duration::from_secs(5),
            step_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    /// Record an externally supplied component.
    Adopt,
    Deploy,
    Wiring,
}

/// One unit of work of a run.
#[derive(Debug, Clone, Copy)]
pub enum Step<'a> {
    Adopt {
        component: &'a ComponentSpec,
        address: Address,
    },
    Deploy {
        component: &'a ComponentSpec,
    },
    Wire {
        component: &'a ComponentSpec,
        /// Position of `hook` among the hooks of `component`.
        index: usize,
        hook: &'a HookSpec,
    },
}

impl<'a> Step<'a> {
    /// Every component in deployment order, each followed by its hooks.
    pub fn from_plan(plan: &'a Plan) -> Vec<Step<'a>> {
        let mut steps = Vec::new();
        for component in plan.ordered() {
            match component.external {
                Some(address) => steps.push(Step::Adopt { component, address }),
                None => {
                    steps.push(Step::Deploy { component });
                    steps.extend(component.hooks.iter().enumerate().map(|(index, hook)| {
                        Step::Wire {
                            component,
                            index,
                            hook,
                        }
                    }));
                }
            }
        }
        steps
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Adopt { .. } => StepKind::Adopt,
            Step::Deploy { .. } => StepKind::Deploy,
            Step::Wire { .. } => StepKind::Wiring,
        }
    }

    pub fn component(&self) -> &'a ComponentSpec {
        match *self {
            Step::Adopt { component, .. }
            | Step::Deploy { component }
            | Step::Wire { component, .. } => component,
        }
    }

    pub fn hook(&self) -> Option<&'a HookSpec> {
        match *self {
            Step::Wire { hook, .. } => Some(hook),
            _ => None,
        }
    }

    pub fn hook_index(&self) -> Option<usize> {
        match *self {
            Step::Wire { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Whether the context already reflects this step.
    pub fn is_done(&self, context: &ResolutionContext) -> bool {
        match self {
            Step::Adopt { component, .. } | Step::Deploy { component } => {
                context.contains(&component.name)
            }
            Step::Wire {
                component,
                index,
                hook,
            } => context.is_wired(&component.name, *index, &hook.method),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Step::Adopt { component, .. } => format!("adopt {}", component.name),
            Step::Deploy { component } => format!("deploy {}", component.name),
            Step::Wire {
                component, hook, ..
            } => format!("wire {}.{}", component.name, hook.method),
        }
    }
}

/// Result of [`Executor::execute`]: the record of what succeeded and the error that stopped
/// the run, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub error: Option<DeployError>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The record of a complete run, or the error of a partial one.
    pub fn into_result(self) -> Result<RunRecord, DeployError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.record),
        }
    }
}

/// Drives a [`Plan`] against a [`LedgerClient`].
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
    cancel: Option<watch::Receiver<bool>>,
    config_hash: Option<String>,
    checkpoint: Option<(ManifestStore, ManifestKey)>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Stop before the next step once the channel holds `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Configuration fingerprint stamped on the record and compared on resume.
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Persist a partial record after every completed step.
    pub fn with_checkpoint(mut self, store: ManifestStore, key: ManifestKey) -> Self {
        self.checkpoint = Some((store, key));
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every step of `plan` not already reflected in `context`.
    ///
    /// Only failures that happen before the first step (querying the account or the network)
    /// are returned as `Err`. Step failures come back inside the [`RunOutcome`] together with
    /// the partial record.
    pub async fn execute<L: LedgerClient>(
        &self,
        plan: &Plan,
        ledger: &L,
        context: ResolutionContext,
    ) -> Result<RunOutcome, DeployError> {
        let (network, deployer) = self.open(ledger).await?;
        Ok(self.run(plan, ledger, context, network, deployer).await)
    }

    /// Continue a previous run from its record.
    ///
    /// Components and hooks present in the record are trusted as-is and skipped. When the
    /// previous run stopped on a transaction whose outcome was unknown, that transaction is
    /// looked up first and its step is recorded if it was mined.
    pub async fn resume<L: LedgerClient>(
        &self,
        plan: &Plan,
        ledger: &L,
        previous: &RunRecord,
    ) -> Result<RunOutcome, DeployError> {
        let (network, deployer) = self.open(ledger).await?;
        self.check_resumable(plan, previous, &network)?;

        if previous.deployer != deployer {
            tracing::warn!(
                previous = %previous.deployer,
                current = %deployer,
                "Resuming with a different deployer account"
            );
        }

        tracing::info!(
            components = previous.components.len(),
            wiring = previous.wiring.len(),
            "Resuming from previous run record"
        );

        let mut context = previous.context();
        context.set_deployer(deployer);
        if let Some(failure) = &previous.failure {
            self.settle_pending(plan, ledger, &mut context, failure).await?;
        }

        Ok(self.run(plan, ledger, context, network, deployer).await)
    }

    /// Record the step of a transaction left unconfirmed by a previous run, if it was mined.
    async fn settle_pending<L: LedgerClient>(
        &self,
        plan: &Plan,
        ledger: &L,
        context: &mut ResolutionContext,
        failure: &FailureRecord,
    ) -> Result<(), DeployError> {
        let Some(tx_hash) = failure.pending_tx else {
            return Ok(());
        };
        let unmatched = || {
            DeployError::Configuration(format!(
                "unconfirmed transaction {tx_hash} does not match any step of the plan"
            ))
        };

        let component = failure
            .component
            .as_deref()
            .and_then(|name| plan.get(name))
            .ok_or_else(unmatched)?;

        let Some(mined) = self
            .bounded(ledger.transaction(tx_hash))
            .await
            .map_err(DeployError::Ledger)?
        else {
            return Err(DeployError::Configuration(format!(
                "transaction {tx_hash} of `{}` is not mined yet, wait for it or start a fresh run",
                component.name
            )));
        };

        if !mined.succeeded {
            tracing::warn!(
                tx_hash = %tx_hash,
                component = %component.name,
                "Unconfirmed transaction reverted, running its step again"
            );
            return Ok(());
        }

        match (failure.step, failure.hook_index) {
            (Some(StepKind::Deploy), _) => {
                let address = mined.contract_address.ok_or_else(unmatched)?;
                let args = (component.args)(&*context)
                    .map_err(|missing| unresolved(&component.name, missing))?;

                tracing::info!(
                    component = %component.name,
                    address = %address,
                    tx_hash = %tx_hash,
                    "Recovered deployment of the previous run"
                );
                context.record(
                    &component.name,
                    DeployedComponent {
                        contract: component.contract.clone(),
                        address,
                        block_number: Some(mined.block_number),
                        tx_hash: Some(tx_hash),
                        constructor_args: args,
                        external: false,
                    },
                );
            }
            (Some(StepKind::Wiring), Some(index)) => {
                let hook = component
                    .hooks
                    .get(index)
                    .filter(|hook| failure.hook.as_deref() == Some(hook.method.as_str()))
                    .ok_or_else(unmatched)?;

                tracing::info!(
                    component = %component.name,
                    hook = %hook.method,
                    tx_hash = %tx_hash,
                    "Recovered wiring call of the previous run"
                );
                context.record_wiring(WiringRecord {
                    component: component.name.clone(),
                    index,
                    hook: hook.method.clone(),
                    target: hook.target.clone(),
                    tx_hash: Some(tx_hash),
                    block_number: Some(mined.block_number),
                });
            }
            _ => return Err(unmatched()),
        }

        Ok(())
    }

    fn check_resumable(
        &self,
        plan: &Plan,
        previous: &RunRecord,
        network: &NetworkInfo,
    ) -> Result<(), DeployError> {
        if previous.network.chain_id != network.chain_id {
            return Err(DeployError::Configuration(format!(
                "run record belongs to chain {} but the node is on chain {}",
                previous.network.chain_id, network.chain_id
            )));
        }

        if let (Some(previous_hash), Some(current_hash)) =
            (previous.config_hash.as_deref(), self.config_hash.as_deref())
        {
            if previous_hash != current_hash {
                tracing::warn!(
                    previous = previous_hash,
                    current = current_hash,
                    "Configuration changed since the recorded run, already deployed components keep their old parameters"
                );
            }
        }

        for (name, deployed) in previous.components.iter() {
            let Some(spec) = plan.get(name) else {
                tracing::warn!(component = name, "Recorded component is not part of the plan");
                continue;
            };
            if deployed.external != spec.external.is_some() {
                let (recorded, configured) = if deployed.external {
                    ("supplied externally", "deployed")
                } else {
                    ("deployed", "supplied externally")
                };
                return Err(DeployError::Configuration(format!(
                    "`{name}` was recorded as {recorded} but is now configured to be {configured}"
                )));
            }
            if let Some(address) = spec.external {
                if deployed.address != address {
                    return Err(DeployError::Configuration(format!(
                        "`{name}` was recorded at {} but is configured at {address}",
                        deployed.address
                    )));
                }
            } else if deployed.contract != spec.contract {
                return Err(DeployError::Configuration(format!(
                    "`{name}` was recorded as `{}` but the plan deploys `{}`",
                    deployed.contract, spec.contract
                )));
            }
        }

        Ok(())
    }

    async fn run<L: LedgerClient>(
        &self,
        plan: &Plan,
        ledger: &L,
        mut context: ResolutionContext,
        network: NetworkInfo,
        deployer: Address,
    ) -> RunOutcome {
        context.set_deployer(deployer);

        let steps = Step::from_plan(plan);
        tracing::info!(
            network = %network.name,
            chain_id = network.chain_id,
            deployer = %deployer,
            steps = steps.len(),
            "Starting deployment run"
        );

        let mut error = None;
        let mut failure = None;

        for step in &steps {
            if step.is_done(&context) {
                tracing::debug!(step = %step.label(), "Already applied, skipping");
                continue;
            }

            if self.is_cancelled() {
                let err = DeployError::Cancelled {
                    next_step: step.label(),
                };
                tracing::warn!(step = %step.label(), "Run cancelled");
                failure = Some(failure_record(step, &err));
                error = Some(err);
                break;
            }

            if let Err(err) = self.run_step(step, ledger, &mut context).await {
                tracing::error!(step = %step.label(), error = %error_chain(&err), "Step failed");
                failure = Some(failure_record(step, &err));
                error = Some(err);
                break;
            }

            self.save_checkpoint(&context, &network, deployer);
        }

        let block_number = match self.bounded(ledger.block_number()).await {
            Ok(block_number) => block_number,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to query the final block number");
                last_recorded_block(&context)
            }
        };

        let record = RunRecord::snapshot(
            &context,
            network,
            deployer,
            block_number,
            self.config_hash.clone(),
            failure,
        );

        match &error {
            None => tracing::info!(
                components = record.components.len(),
                block_number,
                "Deployment run complete"
            ),
            Some(_) => tracing::warn!(
                components = record.components.len(),
                "Deployment run stopped, returning partial record"
            ),
        }

        RunOutcome { record, error }
    }

    async fn run_step<L: LedgerClient>(
        &self,
        step: &Step<'_>,
        ledger: &L,
        context: &mut ResolutionContext,
    ) -> Result<(), DeployError> {
        match *step {
            Step::Adopt { component, address } => {
                tracing::info!(
                    component = %component.name,
                    address = %address,
                    "Using externally supplied component"
                );
                context.record(
                    &component.name,
                    DeployedComponent {
                        contract: component.contract.clone(),
                        address,
                        block_number: None,
                        tx_hash: None,
                        constructor_args: Vec::new(),
                        external: true,
                    },
                );
            }
            Step::Deploy { component } => {
                let args = (component.args)(&*context)
                    .map_err(|missing| unresolved(&component.name, missing))?;

                tracing::info!(
                    component = %component.name,
                    contract = %component.contract,
                    args = args.len(),
                    "Deploying component"
                );

                let contract = component.contract.as_str();
                let call_args = args.as_slice();
                let receipt = self
                    .submit(
                        &step.label(),
                        self.config.max_deploy_attempts,
                        move || ledger.deploy(contract, call_args),
                    )
                    .await
                    .map_err(|cause| DeployError::DeploymentFailed {
                        component: component.name.clone(),
                        cause,
                    })?;

                tracing::info!(
                    component = %component.name,
                    address = %receipt.address,
                    block_number = receipt.block_number,
                    "Component deployed"
                );

                context.record(
                    &component.name,
                    DeployedComponent {
                        contract: component.contract.clone(),
                        address: receipt.address,
                        block_number: Some(receipt.block_number),
                        tx_hash: receipt.tx_hash,
                        constructor_args: args,
                        external: false,
                    },
                );
            }
            Step::Wire {
                component,
                index,
                hook,
            } => {
                let target = context
                    .address(&hook.target)
                    .map_err(|missing| unresolved(&component.name, missing))?;
                let args =
                    (hook.args)(&*context).map_err(|missing| unresolved(&component.name, missing))?;

                let attempts = if hook.idempotent {
                    self.config.max_call_attempts
                } else {
                    1
                };

                tracing::info!(
                    component = %component.name,
                    hook = %hook.method,
                    target = %hook.target,
                    "Applying wiring call"
                );

                let method = hook.method.as_str();
                let call_args = args.as_slice();
                let receipt = self
                    .submit(&step.label(), attempts, move || {
                        ledger.call(target, method, call_args)
                    })
                    .await
                    .map_err(|cause| DeployError::WiringFailed {
                        component: component.name.clone(),
                        hook: hook.method.clone(),
                        cause,
                    })?;

                context.record_wiring(WiringRecord {
                    component: component.name.clone(),
                    index,
                    hook: hook.method.clone(),
                    target: hook.target.clone(),
                    tx_hash: receipt.tx_hash,
                    block_number: Some(receipt.block_number),
                });
            }
        }

        Ok(())
    }

    /// Run `op` under the step timeout, retrying transient failures up to `attempts` times.
    async fn submit<T, F, Fut>(
        &self,
        label: &str,
        attempts: usize,
        mut op: F,
    ) -> Result<T, SubmissionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SubmissionError>>,
    {
        let timeout = self.config.step_timeout;
        let attempt = move || {
            let fut = op();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(SubmissionError::Timeout(timeout)),
                }
            }
        };

        let backoff = ConstantBuilder::default()
            .with_delay(self.config.retry_delay)
            .with_max_times(attempts.saturating_sub(1));

        attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(SubmissionError::is_retryable)
            .notify(|err: &SubmissionError, delay: Duration| {
                tracing::warn!(step = label, error = %err, ?delay, "Submission failed, retrying");
            })
            .await
    }

    /// Query the metadata every run needs before its first step.
    async fn open<L: LedgerClient>(
        &self,
        ledger: &L,
    ) -> Result<(NetworkInfo, Address), DeployError> {
        let network = self
            .bounded(ledger.network_info())
            .await
            .map_err(DeployError::Ledger)?;
        let deployer = self
            .bounded(ledger.current_account())
            .await
            .map_err(DeployError::Ledger)?;
        Ok((network, deployer))
    }

    /// Run a ledger query under the step timeout.
    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, SubmissionError>>,
    ) -> Result<T, SubmissionError> {
        let timeout = self.config.step_timeout;
        tokio::time::timeout(timeout, query)
            .await
            .unwrap_or(Err(SubmissionError::Timeout(timeout)))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    fn save_checkpoint(&self, context: &ResolutionContext, network: &NetworkInfo, deployer: Address) {
        let Some((store, key)) = &self.checkpoint else {
            return;
        };

        let mut record = RunRecord::snapshot(
            context,
            network.clone(),
            deployer,
            last_recorded_block(context),
            self.config_hash.clone(),
            None,
        );
        record.status = RunStatus::Partial;

        if let Err(err) = store.persist(&record, key) {
            tracing::warn!(error = %format!("{err:#}"), "Failed to write checkpoint");
        }
    }
}

fn unresolved(component: &str, missing: MissingComponent) -> DeployError {
    DeployError::DependencyUnresolved {
        component: component.to_string(),
        dependency: missing.0,
    }
}

fn failure_record(step: &Step<'_>, err: &DeployError) -> FailureRecord {
    FailureRecord {
        component: Some(step.component().name.clone()),
        step: Some(step.kind()),
        hook: step.hook().map(|hook| hook.method.clone()),
        hook_index: step.hook_index(),
        pending_tx: err.submission().and_then(SubmissionError::pending_tx),
        cause: error_chain(err),
    }
}

fn last_recorded_block(context: &ResolutionContext) -> u64 {
    let deployed = context
        .components()
        .iter()
        .filter_map(|(_, component)| component.block_number);
    let wired = context.wiring().iter().filter_map(|record| record.block_number);
    deployed.chain(wired).max().unwrap_or_default()
}
