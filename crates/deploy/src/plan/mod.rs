//! Deployment plan: the static list of components, their dependencies and wiring hooks.
//!
//! A [`Plan`] is validated once at construction: every dependency and hook target must name a
//! component of the plan and the dependency graph must be acyclic. The deployment order is a
//! topological order with a stable tie-break on declaration order, so identical plans always
//! deploy in the same sequence.

mod fantasy;

pub use fantasy::{
    FANTASY_TOKEN, GOVERNANCE_TOKEN, GOVERNOR, MARKET_FACTORY, ORACLE_ROLE, PREDICTION_MARKET,
    SPORTS_ORACLE, TIMELOCK, fantasy_plan,
};

use std::{collections::HashMap, fmt, sync::Arc};

use alloy_core::primitives::Address;
use derive_more::Deref;

use crate::{ContractArg, DeployError, ResolutionContext, error::MissingComponent};

/// Builds an argument list from the components resolved so far.
pub type ArgsBuilder =
    Arc<dyn Fn(&ResolutionContext) -> Result<Vec<ContractArg>, MissingComponent> + Send + Sync>;

fn no_args() -> ArgsBuilder {
    Arc::new(|_| Ok(Vec::new()))
}

/// A post-deployment wiring call.
#[derive(Clone)]
pub struct HookSpec {
    /// Component the call is sent to: the owner itself or one of its dependencies.
    pub target: String,
    /// Function signature, e.g. `setMarketFactory(address)`.
    pub method: String,
    pub args: ArgsBuilder,
    /// Whether the call may be retried after a failed attempt.
    pub idempotent: bool,
}

impl HookSpec {
    pub fn new<F>(target: impl Into<String>, method: impl Into<String>, args: F) -> Self
    where
        F: Fn(&ResolutionContext) -> Result<Vec<ContractArg>, MissingComponent>
            + Send
            + Sync
            + 'static,
    {
        Self {
            target: target.into(),
            method: method.into(),
            args: Arc::new(args),
            idempotent: false,
        }
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

impl fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSpec")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("idempotent", &self.idempotent)
            .finish_non_exhaustive()
    }
}

/// One deployable component of the plan.
#[derive(Clone)]
pub struct ComponentSpec {
    /// Unique name, used as the key of the resolution context and the manifest.
    pub name: String,
    /// Deployable unit (artifact) name.
    pub contract: String,
    /// Components that must be resolved before this one.
    pub dependencies: Vec<String>,
    pub args: ArgsBuilder,
    /// Wiring calls applied after deployment, in order.
    pub hooks: Vec<HookSpec>,
    /// Externally supplied identifier. The component is adopted instead of deployed.
    pub external: Option<Address>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: contract.into(),
            dependencies: Vec::new(),
            args: no_args(),
            hooks: Vec::new(),
            external: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn args<F>(mut self, args: F) -> Self
    where
        F: Fn(&ResolutionContext) -> Result<Vec<ContractArg>, MissingComponent>
            + Send
            + Sync
            + 'static,
    {
        self.args = Arc::new(args);
        self
    }

    pub fn hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn external(mut self, address: Address) -> Self {
        self.external = Some(address);
        self
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("contract", &self.contract)
            .field("dependencies", &self.dependencies)
            .field("hooks", &self.hooks)
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

/// A validated plan. Dereferences to the components in declaration order.
#[derive(Debug, Clone, Deref)]
pub struct Plan {
    #[deref]
    components: Vec<ComponentSpec>,
    order: Vec<usize>,
}

impl Plan {
    /// Validate the components and compute the deployment order.
    pub fn new(components: Vec<ComponentSpec>) -> Result<Self, DeployError> {
        let mut index = HashMap::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            if component.name.trim().is_empty() {
                return Err(DeployError::Configuration(format!(
                    "component #{i} has an empty name"
                )));
            }
            if index.insert(component.name.as_str(), i).is_some() {
                return Err(DeployError::Configuration(format!(
                    "component `{}` is declared twice",
                    component.name
                )));
            }
        }

        for component in &components {
            for dependency in &component.dependencies {
                if !index.contains_key(dependency.as_str()) {
                    return Err(DeployError::UnknownDependency {
                        component: component.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for hook in &component.hooks {
                if !index.contains_key(hook.target.as_str()) {
                    return Err(DeployError::UnknownDependency {
                        component: component.name.clone(),
                        dependency: hook.target.clone(),
                    });
                }
                if hook.target != component.name && !component.dependencies.contains(&hook.target)
                {
                    return Err(DeployError::Configuration(format!(
                        "hook `{}` of `{}` targets `{}` which is neither the component nor one of its dependencies",
                        hook.method, component.name, hook.target
                    )));
                }
            }

            if component.external.is_some() && !component.hooks.is_empty() {
                return Err(DeployError::Configuration(format!(
                    "external component `{}` cannot carry wiring hooks",
                    component.name
                )));
            }
        }

        let order = topological_order(&components, &index)?;

        Ok(Self { components, order })
    }

    /// Components in deployment order.
    pub fn ordered(&self) -> impl Iterator<Item = &ComponentSpec> {
        self.order.iter().map(|&i| &self.components[i])
    }

    pub fn get(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|component| component.name == name)
    }
}

/// Kahn's algorithm, always picking the first ready component in declaration order.
fn topological_order(
    components: &[ComponentSpec],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, DeployError> {
    let mut placed = vec![false; components.len()];
    let mut order = Vec::with_capacity(components.len());

    while order.len() < components.len() {
        let ready = (0..components.len()).find(|&i| {
            !placed[i]
                && components[i]
                    .dependencies
                    .iter()
                    .all(|dependency| placed[index[dependency.as_str()]])
        });

        match ready {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = components
                    .iter()
                    .zip(&placed)
                    .filter(|(_, placed)| !**placed)
                    .map(|(component, _)| component.name.as_str())
                    .collect();
                return Err(DeployError::Configuration(format!(
                    "dependency cycle among: {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    Ok(order)
}
