//! Compiled contract artifacts (Hardhat layout).
//!
//! ```text
//! artifacts/
//!   build-info/<hash>.json               solcLongVersion + standard-JSON input
//!   contracts/<Source>.sol/<Name>.json   contractName, sourceName, bytecode
//!   contracts/<Source>.sol/<Name>.dbg.json  relative path to the build-info
//! ```

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;

/// The parts of a contract artifact the deployment needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    pub source_name: String,
    pub bytecode: Bytes,
}

/// Compiler metadata and sources shared by every contract of a compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    /// Standard-JSON compiler input.
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: PathBuf,
}

/// Artifact store rooted at a compilation output directory.
#[derive(Debug, Clone)]
pub struct Artifacts {
    root: PathBuf,
}

impl Artifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact of `contract`. Abstract contracts and interfaces are rejected.
    pub fn load(&self, contract: &str) -> Result<ContractArtifact> {
        let path = self.locate(contract)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let artifact: ContractArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if artifact.bytecode.is_empty() {
            anyhow::bail!("Contract {} has no bytecode and cannot be deployed", contract);
        }

        Ok(artifact)
    }

    /// Load the build-info the artifact of `contract` was compiled in.
    pub fn build_info(&self, contract: &str) -> Result<BuildInfo> {
        let path = self.locate(contract)?;
        let debug_path = path.with_file_name(format!("{contract}.dbg.json"));
        let content = std::fs::read_to_string(&debug_path)
            .with_context(|| format!("Failed to read {}", debug_path.display()))?;
        let debug: DebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", debug_path.display()))?;

        let build_info_path = debug_path
            .parent()
            .context("Debug file path must have a parent directory")?
            .join(&debug.build_info);
        let content = std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read {}", build_info_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build info {}", build_info_path.display()))
    }

    /// Find `<contract>.json` under `contracts/`. Ambiguous names are an error.
    fn locate(&self, contract: &str) -> Result<PathBuf> {
        let file_name = format!("{contract}.json");
        let mut found = Vec::new();
        find_files(&self.root.join("contracts"), &file_name, &mut found)?;

        match found.len() {
            0 => anyhow::bail!(
                "No artifact named {} under {}",
                file_name,
                self.root.display()
            ),
            1 => Ok(found.remove(0)),
            _ => anyhow::bail!(
                "Artifact name {} is ambiguous: {}",
                contract,
                found
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

fn find_files(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            find_files(&path, file_name, found)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some(file_name) {
            found.push(path);
        }
    }

    Ok(())
}
