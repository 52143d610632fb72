//! Resolution context shared between deployment steps.
//!
//! The executor is the only writer. Entries are appended when a deployment step completes and
//! are never replaced, so an entry exists exactly when its component is on-chain.

use std::fmt;

use alloy_core::primitives::{Address, B256};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::{args::ContractArg, error::MissingComponent};

/// A component that completed its deployment step (or was supplied externally).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedComponent {
    /// Name of the deployable unit (artifact) behind the component.
    pub contract: String,
    /// Ledger-assigned identifier.
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    /// Arguments the constructor was invoked with.
    #[serde(default)]
    pub constructor_args: Vec<ContractArg>,
    /// Supplied by configuration rather than deployed by this tool.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

/// A wiring call that was applied on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiringRecord {
    /// Component that owns the hook.
    pub component: String,
    /// Position of the hook among the hooks of its component.
    #[serde(default)]
    pub index: usize,
    /// Hook identifier (function signature).
    pub hook: String,
    /// Component the call was sent to.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Insertion-ordered component map, serialized as a JSON object in deployment order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentMap(Vec<(String, DeployedComponent)>);

impl ComponentMap {
    pub fn get(&self, name: &str) -> Option<&DeployedComponent> {
        self.0
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, component)| component)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeployedComponent)> {
        self.0.iter().map(|(name, component)| (name.as_str(), component))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an entry. Returns `false` and leaves the map untouched if the name exists.
    fn push(&mut self, name: String, component: DeployedComponent) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.0.push((name, component));
        true
    }
}

impl Serialize for ComponentMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, component) in &self.0 {
            map.serialize_entry(name, component)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ComponentMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ComponentMapVisitor;

        impl<'de> Visitor<'de> for ComponentMapVisitor {
            type Value = ComponentMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of component names to deployed components")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = ComponentMap::default();
                while let Some((name, component)) =
                    access.next_entry::<String, DeployedComponent>()?
                {
                    if !map.push(name.clone(), component) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate component `{name}`"
                        )));
                    }
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ComponentMapVisitor)
    }
}

/// Mapping from component name to its deployed identifier, plus the run's wiring log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    components: ComponentMap,
    wiring: Vec<WiringRecord>,
    deployer: Option<Address>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from a previously persisted run.
    pub fn from_parts(components: ComponentMap, wiring: Vec<WiringRecord>) -> Self {
        Self {
            components,
            wiring,
            deployer: None,
        }
    }

    pub fn set_deployer(&mut self, deployer: Address) {
        self.deployer = Some(deployer);
    }

    /// The account submitting transactions for this run.
    pub fn deployer(&self) -> Result<Address, MissingComponent> {
        self.deployer
            .ok_or_else(|| MissingComponent("deployer account".to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&DeployedComponent> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains(name)
    }

    /// Address of a resolved component.
    pub fn address(&self, name: &str) -> Result<Address, MissingComponent> {
        self.get(name)
            .map(|component| component.address)
            .ok_or_else(|| MissingComponent(name.to_string()))
    }

    /// Record a completed component. Existing entries are never overwritten.
    pub(crate) fn record(&mut self, name: &str, component: DeployedComponent) -> bool {
        self.components.push(name.to_string(), component)
    }

    pub(crate) fn record_wiring(&mut self, record: WiringRecord) {
        self.wiring.push(record);
    }

    /// Whether the hook at `index` of `component` has already been applied, in this run or a
    /// resumed one.
    ///
    /// A component may call the same function several times with different arguments, so the
    /// signature alone does not identify a hook.
    pub fn is_wired(&self, component: &str, index: usize, hook: &str) -> bool {
        self.wiring.iter().any(|record| {
            record.component == component && record.index == index && record.hook == hook
        })
    }

    pub fn components(&self) -> &ComponentMap {
        &self.components
    }

    pub fn wiring(&self) -> &[WiringRecord] {
        &self.wiring
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
