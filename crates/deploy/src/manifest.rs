//! Durable run records.
//!
//! A [`RunRecord`] is the source of truth consumed by downstream tooling (frontends,
//! verification, market creation). One manifest exists per network; a new run overwrites it.
//! Loading is forward-compatible: unknown fields are ignored and optional fields default to
//! absent.

use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    NetworkInfo, ResolutionContext, StepKind,
    context::{ComponentMap, WiringRecord},
    fs::{FileLock, FsHandler},
};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

fn default_version() -> u32 {
    MANIFEST_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Every step of the plan completed.
    Complete,
    /// The run stopped early. The record lists exactly what succeeded.
    Partial,
}

/// Why a partial run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    /// Position of the hook among the hooks of its component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_index: Option<usize>,
    /// Transaction the failed step sent without seeing it confirmed. A resumed run looks it up
    /// before doing anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tx: Option<B256>,
    /// Error message including its causes.
    pub cause: String,
}

/// Outcome of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub status: RunStatus,
    pub network: NetworkInfo,
    pub deployer: Address,
    /// ISO-8601 UTC time the record was produced.
    pub timestamp: String,
    pub block_number: u64,
    /// Fingerprint of the on-chain relevant configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub components: ComponentMap,
    #[serde(default)]
    pub wiring: Vec<WiringRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

impl RunRecord {
    /// Snapshot a context into a record stamped with the current time.
    pub fn snapshot(
        context: &ResolutionContext,
        network: NetworkInfo,
        deployer: Address,
        block_number: u64,
        config_hash: Option<String>,
        failure: Option<FailureRecord>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            status: if failure.is_some() {
                RunStatus::Partial
            } else {
                RunStatus::Complete
            },
            network,
            deployer,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            block_number,
            config_hash,
            components: context.components().clone(),
            wiring: context.wiring().to_vec(),
            failure,
        }
    }

    /// Rebuild the resolution context this record was taken from.
    pub fn context(&self) -> ResolutionContext {
        ResolutionContext::from_parts(self.components.clone(), self.wiring.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn key(&self) -> ManifestKey {
        ManifestKey::for_network(&self.network)
    }
}

/// Storage key of a manifest, derived from network identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestKey(String);

impl ManifestKey {
    /// `<name>-<chainId>`, so distinct networks sharing a name never collide.
    pub fn for_network(network: &NetworkInfo) -> Self {
        let name: String = network
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        Self(format!("{}-{}", name, network.chain_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads and writes manifests in a directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &ManifestKey) -> PathBuf {
        self.dir.join(format!("{key}-deployment.json"))
    }

    /// Atomically write `record` under `key`.
    pub fn persist(&self, record: &RunRecord, key: &ManifestKey) -> Result<PathBuf> {
        FsHandler::create_dir(&self.dir)?;

        let path = self.path(key);
        let json =
            serde_json::to_string_pretty(record).context("Failed to serialize run record")?;
        FsHandler::write_atomic(&path, json.as_bytes())?;

        tracing::info!(
            path = %path.display(),
            status = %record.status,
            components = record.components.len(),
            "Run record saved"
        );
        Ok(path)
    }

    /// Load the record stored under `key`, or `None` if there is none.
    pub fn load(&self, key: &ManifestKey) -> Result<Option<RunRecord>> {
        let path = self.path(key);
        if !path
            .try_exists()
            .with_context(|| format!("Failed to check {}", path.display()))?
        {
            return Ok(None);
        }

        Self::read(&path).map(Some)
    }

    /// Read a run record from an explicit path.
    pub fn read(path: &Path) -> Result<RunRecord> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record: RunRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run record {}", path.display()))?;

        if record.version > MANIFEST_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = record.version,
                supported = MANIFEST_VERSION,
                "Run record was written by a newer version, unknown fields are ignored"
            );
        }

        Ok(record)
    }

    /// Hold an exclusive lock on `key` for the duration of a run.
    pub fn lock(&self, key: &ManifestKey) -> Result<FileLock> {
        FsHandler::create_dir(&self.dir)?;
        FsHandler::try_lock(&self.dir.join(format!(".{key}.lock")))
    }
}
