//! Contract → running node.
//!
//! Resolution steps:
//! 1. Load the contract through the [`ContractStore`].
//! 2. Pick the implementation module (override, contract field, or layout).
//! 3. Pick the implementation type inside the module.
//! 4. Resolve declared dependencies through the [`Container`].
//! 5. Construct the node through its registered [`NodeFactory`](crate::NodeFactory).
//! 6. Attach the contract and check the node's optional accessors.
//! 7. Cache the node by name.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use keel_contract::{Contract, ContractStore};
use keel_pipeline::{CallableRegistry, Hook, HookBody};
use keel_types::{Context, KernelError, LoadCache, NodeLoadCode, Result};

use crate::container::Container;
use crate::deps::{Dependencies, DependencyOutcome, DependencyReport, DependencyValue, REGISTRY_KEY};
use crate::locate::{module_candidates, resolve_type, MatchStrategy};
use crate::node::{Node, NodeModule, NodeRegistry};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Last segment of derived module paths.
    pub entrypoint: String,
    /// Fail the load when a non-optional dependency is omitted.
    pub strict_dependencies: bool,
}

impl ResolverConfig {
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn with_strict_dependencies(mut self, strict: bool) -> Self {
        self.strict_dependencies = strict;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            entrypoint: "node".into(),
            strict_dependencies: false,
        }
    }
}

/// Optional node accessors that returned nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub missing: Vec<String>,
}

impl ComplianceReport {
    pub fn is_compliant(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A constructed node plus how it was resolved.
pub struct ResolvedNode {
    pub node: Arc<dyn Node>,
    pub contract: Arc<Contract>,
    /// Whether the node accepted the contract.
    pub contract_attached: bool,
    pub module_path: String,
    pub type_name: String,
    pub strategy: MatchStrategy,
    pub dependencies: Vec<DependencyReport>,
    pub compliance: ComplianceReport,
}

impl ResolvedNode {
    pub fn name(&self) -> &str {
        &self.contract.node_name
    }

    /// Callable reference under which [`register_run`](Self::register_run)
    /// binds the node.
    pub fn run_callable_ref(&self) -> String {
        format!("{}.run", self.contract.node_name)
    }

    /// Bind the node's `run` into `registry` and return the `execute` hook
    /// that invokes it.
    pub fn register_run(&self, registry: &mut CallableRegistry) -> Hook {
        let node = self.node.clone();
        let callable_ref = self.run_callable_ref();
        registry.register(
            callable_ref.clone(),
            HookBody::from_async(move |ctx: Context| {
                let node = node.clone();
                async move { node.run(&ctx).await }
            }),
        );
        Hook::new(callable_ref.clone(), callable_ref)
    }
}

impl std::fmt::Debug for ResolvedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedNode")
            .field("node", &self.node.name())
            .field("module_path", &self.module_path)
            .field("type_name", &self.type_name)
            .field("strategy", &self.strategy)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// NodeResolver
// ---------------------------------------------------------------------------

pub struct NodeResolver {
    store: Arc<ContractStore>,
    registry: Arc<NodeRegistry>,
    container: Arc<dyn Container>,
    config: ResolverConfig,
    nodes: LoadCache<String, Arc<ResolvedNode>>,
}

impl NodeResolver {
    pub fn new(store: Arc<ContractStore>, registry: Arc<NodeRegistry>, container: Arc<dyn Container>) -> Self {
        Self {
            store,
            registry,
            container,
            config: ResolverConfig::default(),
            nodes: LoadCache::new(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        &self.store
    }

    /// Resolve the node described by the contract at `contract_path`.
    ///
    /// `module_override` takes precedence over both the contract's
    /// `implementation.module_path` and the layout-derived location. A node
    /// already cached under the contract's `node_name` is returned as-is.
    pub async fn load_from_contract(
        &self,
        contract_path: impl AsRef<Path>,
        module_override: Option<&str>,
    ) -> Result<Arc<ResolvedNode>> {
        let path = contract_path.as_ref();
        let contract = self.store.load(path).await.map_err(|e| {
            KernelError::node_load(NodeLoadCode::ContractLoadFailed, e.to_string())
                .with_detail("path", path.display().to_string())
                .with_detail("cause", e.code())
        })?;

        let name = contract.node_name.clone();
        self.cache_or_build(&name, || self.build(contract, Some(path), module_override))
            .await
    }

    /// Resolve a node from an inline spec, skipping contract loading.
    pub async fn load_from_spec(
        &self,
        node_name: &str,
        main_tool_class: &str,
        module_path: &str,
    ) -> Result<Arc<ResolvedNode>> {
        let contract = Arc::new(Contract::synthetic(node_name, main_tool_class, module_path));
        self.cache_or_build(node_name, || self.build(contract, None, None))
            .await
    }

    /// The cached node for `node_name`, if one has been resolved.
    pub fn cached(&self, node_name: &str) -> Option<Arc<ResolvedNode>> {
        self.nodes.peek(&node_name.to_string())
    }

    pub fn clear_cache(&self) {
        self.nodes.clear();
        tracing::debug!("Node cache cleared");
    }

    async fn cache_or_build<F, Fut>(&self, name: &str, build: F) -> Result<Arc<ResolvedNode>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedNode>>,
    {
        let key = name.to_string();
        let (node, hit) = self
            .nodes
            .get_or_load(&key, |_| true, || async move { build().await.map(Arc::new) })
            .await?;
        if hit {
            tracing::debug!(node_name = %key, "Node served from cache");
        }
        Ok(node)
    }

    async fn build(
        &self,
        contract: Arc<Contract>,
        contract_path: Option<&Path>,
        module_override: Option<&str>,
    ) -> Result<ResolvedNode> {
        let expected = contract.tool_specification.main_tool_class.clone();
        let (module_path, module) = self
            .locate_module(&contract, contract_path, module_override)
            .await?;

        let (type_name, strategy) = resolve_type(module, &expected, &contract).ok_or_else(|| {
            KernelError::node_load(
                NodeLoadCode::TypeNotFound,
                format!("no implementation type for '{expected}' in module '{module_path}'"),
            )
            .with_detail("module", module_path.clone())
            .with_detail("expected_name", expected.clone())
            .with_detail("available", module.type_names().collect::<Vec<_>>())
        })?;
        if strategy != MatchStrategy::Exact {
            tracing::debug!(expected = %expected, found = %type_name, ?strategy, "Implementation type resolved by fallback");
        }

        let (deps, dependencies) = self.resolve_dependencies(&contract)?;

        let factory = module.factory(&type_name).ok_or_else(|| {
            KernelError::node_load(NodeLoadCode::TypeNotFound, format!("type '{type_name}' vanished from module"))
        })?;
        let mut node = factory.construct(&deps).map_err(|e| {
            KernelError::node_load(
                NodeLoadCode::InstantiationFailed,
                format!("failed to construct '{type_name}': {e}"),
            )
            .with_detail("node_class", type_name.clone())
            .with_detail("available_deps", deps.keys().collect::<Vec<_>>())
        })?;

        let contract_attached = node.attach_contract(contract.clone());
        let compliance = check_compliance(&*node);

        tracing::info!(
            node_name = %contract.node_name,
            module = %module_path,
            type_name = %type_name,
            dependencies = dependencies.len(),
            "Node resolved"
        );

        Ok(ResolvedNode {
            node: Arc::from(node),
            contract,
            contract_attached,
            module_path,
            type_name,
            strategy,
            dependencies,
            compliance,
        })
    }

    async fn locate_module(
        &self,
        contract: &Contract,
        contract_path: Option<&Path>,
        module_override: Option<&str>,
    ) -> Result<(String, &NodeModule)> {
        let explicit = module_override
            .filter(|p| !p.trim().is_empty())
            .or_else(|| contract.module_path());

        let candidates = match explicit {
            Some(path) => vec![path.to_string()],
            None => module_candidates(contract_path, contract, &self.config.entrypoint).await,
        };

        for candidate in &candidates {
            if let Some(module) = self.registry.module(candidate) {
                return Ok((candidate.clone(), module));
            }
        }

        let first = candidates.first().cloned().unwrap_or_default();
        Err(KernelError::node_load(
            NodeLoadCode::ModuleNotFound,
            format!("no implementation module registered at '{first}'"),
        )
        .with_detail("module", first)
        .with_detail("expected_name", contract.tool_specification.main_tool_class.clone())
        .with_detail("candidates", candidates))
    }

    fn resolve_dependencies(&self, contract: &Contract) -> Result<(Dependencies, Vec<DependencyReport>)> {
        let mut deps = Dependencies::new(self.container.clone());
        let mut report = Vec::new();

        for req in contract.dependency_requests() {
            let outcome = match self.container.get_service(&req.protocol, req.binding.as_deref()) {
                Ok(service) => {
                    deps.insert(req.name.clone(), DependencyValue::Service(service));
                    DependencyOutcome::Resolved
                }
                Err(err) => match req.fallback.clone() {
                    Some(fallback) => {
                        tracing::warn!(dependency = %req.name, protocol = %req.protocol, error = %err, "Using fallback for dependency");
                        deps.insert(req.name.clone(), DependencyValue::Value(fallback));
                        DependencyOutcome::FallbackUsed {
                            reason: err.to_string(),
                        }
                    }
                    None => {
                        tracing::warn!(dependency = %req.name, protocol = %req.protocol, error = %err, "Omitting unresolved dependency");
                        if self.config.strict_dependencies && !req.optional {
                            return Err(KernelError::node_load(
                                NodeLoadCode::DependencyUnresolved,
                                format!("dependency '{}' could not be resolved: {err}", req.name),
                            )
                            .with_detail("dependency", req.name.clone())
                            .with_detail("protocol", req.protocol.clone()));
                        }
                        DependencyOutcome::Omitted {
                            reason: err.to_string(),
                        }
                    }
                },
            };
            report.push(DependencyReport {
                name: req.name,
                protocol: req.protocol,
                optional: req.optional,
                outcome,
            });
        }

        let outcome = match self.container.service_discovery() {
            Ok(registry) => {
                deps.insert(REGISTRY_KEY, DependencyValue::Service(registry));
                DependencyOutcome::Resolved
            }
            Err(err) => {
                tracing::warn!(error = %err, "Service discovery unavailable; 'registry' not bound");
                DependencyOutcome::Omitted {
                    reason: err.to_string(),
                }
            }
        };
        report.push(DependencyReport {
            name: REGISTRY_KEY.into(),
            protocol: "service_discovery".into(),
            optional: true,
            outcome,
        });

        Ok((deps, report))
    }
}

impl std::fmt::Debug for NodeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeResolver")
            .field("config", &self.config)
            .field("cached_nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

fn check_compliance(node: &dyn Node) -> ComplianceReport {
    let mut missing = Vec::new();
    if node.input_schema().is_none() {
        missing.push("input_schema".to_string());
    }
    if node.output_schema().is_none() {
        missing.push("output_schema".to_string());
    }
    if node.config().is_none() {
        missing.push("config".to_string());
    }
    if !missing.is_empty() {
        tracing::warn!(node = node.name(), missing = ?missing, "Node is missing optional accessors");
    }
    ComplianceReport { missing }
}
