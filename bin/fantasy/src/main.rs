//! fantasy deploys the Fantasy Sports prediction market contracts, wires them together and
//! verifies their sources.

mod cli;
mod summary;

use std::future::Future;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cli::{Cli, Command, DeployArgs, ManifestArgs};
use fantasy_deploy::{
    Artifacts, DeployConfig, DeploymentFingerprint, EtherscanVerifier, Executor, LedgerClient,
    ManifestKey, ManifestStore, ResolutionContext, RpcLedger, RunRecord, VerificationDriver,
    VerificationReport, fantasy_plan,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = cli.load_config()?;

    match cli.command.clone().unwrap_or(Command::Deploy(DeployArgs::default())) {
        Command::Deploy(args) => deploy(&config, &args).await,
        Command::Verify(args) => {
            let record = load_record(&config, &args).await?;
            let report = verify(&config, &record).await?;
            summary::print_report(&report);
            Ok(())
        }
        Command::Status(args) => {
            let record = load_record(&config, &args).await?;
            summary::print_record(&record);
            Ok(())
        }
        Command::Init { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite it",
                    cli.config.display()
                );
            }
            config.save_to_file(&cli.config)
        }
    }
}

async fn connect(config: &DeployConfig) -> Result<RpcLedger> {
    RpcLedger::connect(
        config.rpc_url.clone(),
        config.from,
        Artifacts::new(&config.artifacts_dir),
        config.network_name.clone(),
    )
    .await
    .map(|ledger| ledger.receipt_timeout(config.receipt_timeout()))
    .with_context(|| format!("Failed to connect to {}", config.rpc_url))
}

async fn deploy(config: &DeployConfig, args: &DeployArgs) -> Result<()> {
    let plan = fantasy_plan(config)?;
    let ledger = connect(config).await?;
    let network = ledger.network_info().await?;

    let store = ManifestStore::new(&config.deployments_dir);
    let key = ManifestKey::for_network(&network);
    let _lock = store.lock(&key)?;

    let previous = store.load(&key)?;
    if let Some(previous) = &previous {
        if !args.resume && !args.fresh {
            anyhow::bail!(
                "{} already holds a {} deployment with {} components, pass --resume to continue it or --fresh to start over",
                store.path(&key).display(),
                previous.status,
                previous.components.len()
            );
        }
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if relay_interrupts(tokio::signal::ctrl_c, cancel_tx).await {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let executor = Executor::new(config.executor_config())
        .with_cancellation(cancel_rx)
        .with_config_hash(DeploymentFingerprint::from_config(config).compute_hash())
        .with_checkpoint(store.clone(), key.clone());

    let outcome = match previous {
        Some(previous) if args.resume => executor.resume(&plan, &ledger, &previous).await?,
        _ => {
            if args.resume {
                tracing::warn!(network = %network.name, "No stored deployment to resume, starting a new one");
            }
            executor
                .execute(&plan, &ledger, ResolutionContext::new())
                .await?
        }
    };

    let path = store.persist(&outcome.record, &key)?;
    summary::print_record(&outcome.record);

    let record = outcome
        .into_result()
        .with_context(|| format!("Deployment stopped, partial record saved to {}", path.display()))?;

    if args.skip_verify {
        return Ok(());
    }

    let report = verify(config, &record).await?;
    summary::print_report(&report);
    Ok(())
}

/// Exit code of a run aborted by a second interrupt (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Ask the executor to stop on the first interrupt. Returns `true` when a second interrupt
/// arrives, meaning the process should exit without waiting for the current step.
async fn relay_interrupts<F, Fut>(mut interrupted: F, cancel: watch::Sender<bool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }
    tracing::warn!("Interrupt received, stopping after the current step (interrupt again to exit now)");
    let _ = cancel.send(true);

    if interrupted().await.is_err() {
        return false;
    }
    tracing::error!("Second interrupt received, exiting without waiting for the current step");
    true
}

async fn verify(config: &DeployConfig, record: &RunRecord) -> Result<VerificationReport> {
    let verifier = EtherscanVerifier::new(
        config.verifier_url.clone(),
        config.verifier_api_key.clone(),
        record.network.chain_id,
        Artifacts::new(&config.artifacts_dir),
    )?;

    Ok(VerificationDriver::new(config.verify_config())
        .verify_all(record, &verifier)
        .await)
}

/// The manifest named on the command line, or the one of the connected network.
async fn load_record(config: &DeployConfig, args: &ManifestArgs) -> Result<RunRecord> {
    if let Some(path) = &args.manifest {
        return ManifestStore::read(path);
    }

    let network = connect(config).await?.network_info().await?;
    let store = ManifestStore::new(&config.deployments_dir);
    let key = ManifestKey::for_network(&network);
    store
        .load(&key)?
        .with_context(|| format!("No deployment stored at {}", store.path(&key).display()))
}
