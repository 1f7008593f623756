//! The node trait, factories, and the registry of implementation modules.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use keel_contract::Contract;
use keel_types::{Context, Result};

use crate::deps::Dependencies;

/// Abstract base type name that the module scan never selects.
pub const NODE_BASE: &str = "NodeBase";

// ---------------------------------------------------------------------------
// Node trait
// ---------------------------------------------------------------------------

/// An instantiated executable unit.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Execute the node's business logic against the run context.
    async fn run(&self, context: &Context) -> Result<()>;

    fn input_schema(&self) -> Option<serde_json::Value> {
        None
    }

    fn output_schema(&self) -> Option<serde_json::Value> {
        None
    }

    fn config(&self) -> Option<serde_json::Value> {
        None
    }

    /// Accept the contract the node was built from. Returns `false` when the
    /// node has no use for it.
    fn attach_contract(&mut self, _contract: Arc<Contract>) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// NodeFactory
// ---------------------------------------------------------------------------

/// Builds a node from its resolved dependencies.
pub trait NodeFactory: Send + Sync {
    fn construct(&self, deps: &Dependencies) -> Result<Box<dyn Node>>;
}

/// [`NodeFactory`] backed by a closure.
pub struct FnFactory<F>(F);

impl<F> NodeFactory for FnFactory<F>
where
    F: Fn(&Dependencies) -> Result<Box<dyn Node>> + Send + Sync,
{
    fn construct(&self, deps: &Dependencies) -> Result<Box<dyn Node>> {
        (self.0)(deps)
    }
}

pub fn factory_fn<F>(f: F) -> Arc<dyn NodeFactory>
where
    F: Fn(&Dependencies) -> Result<Box<dyn Node>> + Send + Sync + 'static,
{
    Arc::new(FnFactory(f))
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Types exported by one implementation module, in registration order.
#[derive(Clone, Default)]
pub struct NodeModule {
    types: Vec<(String, Arc<dyn NodeFactory>)>,
}

impl NodeModule {
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|(name, _)| name.as_str())
    }

    pub fn factory(&self, type_name: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.types
            .iter()
            .find(|(name, _)| name == type_name)
            .map(|(_, f)| f)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factory(type_name).is_some()
    }
}

/// Module path → exported node types. Populated at startup, then read-only.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    modules: HashMap<String, NodeModule>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `type_name` in `module_path`. Re-registering a type replaces
    /// its factory in place.
    pub fn register(
        &mut self,
        module_path: impl Into<String>,
        type_name: impl Into<String>,
        factory: Arc<dyn NodeFactory>,
    ) {
        let module = self.modules.entry(module_path.into()).or_default();
        let type_name = type_name.into();
        match module.types.iter_mut().find(|(name, _)| *name == type_name) {
            Some(slot) => slot.1 = factory,
            None => module.types.push((type_name, factory)),
        }
    }

    pub fn module(&self, module_path: &str) -> Option<&NodeModule> {
        self.modules.get(module_path)
    }

    pub fn has_module(&self, module_path: &str) -> bool {
        self.modules.contains_key(module_path)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (path, module) in &self.modules {
            map.entry(path, &module.type_names().collect::<Vec<_>>());
        }
        map.finish()
    }
}
