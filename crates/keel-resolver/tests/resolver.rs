//! End-to-end tests for node resolution: contract on disk -> registry lookup ->
//! dependency injection -> constructed node.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use keel_contract::{Contract, ContractStore};
use keel_pipeline::{CallableRegistry, ExecutionPlan, Phase, PipelineRunner};
use keel_resolver::{
    factory_fn, Dependencies, DependencyOutcome, MatchStrategy, Node, NodeFactory, NodeRegistry,
    NodeResolver, ResolverConfig, ServiceContainer, REGISTRY_KEY,
};
use keel_types::{Context, KernelError, NodeLoadCode, Result};

// ---------------------------------------------------------------------------
// Test node
// ---------------------------------------------------------------------------

struct StubNode {
    label: String,
    dep_keys: Vec<String>,
    contract: Option<Arc<Contract>>,
}

#[async_trait]
impl Node for StubNode {
    fn name(&self) -> &str {
        &self.label
    }

    async fn run(&self, context: &Context) -> Result<()> {
        context.set("ran_by", serde_json::json!(self.label)).await;
        Ok(())
    }

    fn config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "label": self.label,
            "dep_keys": self.dep_keys,
            "contract": self.contract.as_ref().map(|c| c.node_name.clone()),
        }))
    }

    fn attach_contract(&mut self, contract: Arc<Contract>) -> bool {
        self.contract = Some(contract);
        true
    }
}

/// Factory producing a [`StubNode`] labelled `label`, counting constructions.
fn stub(label: &'static str, builds: &Arc<AtomicUsize>) -> Arc<dyn NodeFactory> {
    let builds = builds.clone();
    factory_fn(move |deps: &Dependencies| {
        builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubNode {
            label: label.to_string(),
            dep_keys: deps.keys().map(String::from).collect(),
            contract: None,
        }))
    })
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const TEXT_FILTER: &str = "node_name: text_filter\n\
node_type: COMPUTE\n\
contract_version: { major: 1, minor: 0, patch: 0 }\n\
tool_specification:\n  main_tool_class: NodeTextFilter\n";

fn write_contract(root: &Path, rel_dir: &str, body: &str) -> PathBuf {
    let dir = root.join(rel_dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("contract.yaml");
    std::fs::write(&path, body).unwrap();
    path
}

fn resolver(registry: NodeRegistry, container: ServiceContainer) -> NodeResolver {
    NodeResolver::new(
        Arc::new(ContractStore::new()),
        Arc::new(registry),
        Arc::new(container),
    )
}

// ---------------------------------------------------------------------------
// Type resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exact_name_wins_over_convention_variant() {
    let root = tempfile::tempdir().unwrap();
    let body = TEXT_FILTER.replace("NodeTextFilter", "TextFilterImpl");
    let path = write_contract(root.path(), "nodes/compute/text_filter", &body);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("variant", &builds));
    reg.register("nodes.compute.text_filter.node", "TextFilterImpl", stub("exact", &builds));

    let node = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap();

    assert_eq!(node.type_name, "TextFilterImpl");
    assert_eq!(node.strategy, MatchStrategy::Exact);
    assert_eq!(node.node.name(), "exact");
}

#[tokio::test]
async fn convention_variant_used_when_exact_missing() {
    let root = tempfile::tempdir().unwrap();
    let body = TEXT_FILTER.replace("NodeTextFilter", "Missing");
    let path = write_contract(root.path(), "nodes/compute/text_filter", &body);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeBase", stub("base", &builds));
    reg.register("nodes.compute.text_filter.node", "TextFilterComputeNode", stub("kind", &builds));

    let node = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap();
    assert_eq!(
        node.strategy,
        MatchStrategy::Convention("TextFilterComputeNode".into())
    );
}

#[tokio::test]
async fn missing_type_reports_module_and_expected_name() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "Helper", stub("x", &builds));

    let err = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TYPE_NOT_FOUND");
    let details = err.details();
    assert_eq!(details["module"], serde_json::json!("nodes.compute.text_filter.node"));
    assert_eq!(details["expected_name"], serde_json::json!("NodeTextFilter"));
}

// ---------------------------------------------------------------------------
// Module location
// ---------------------------------------------------------------------------

#[tokio::test]
async fn versioned_module_preferred_over_unversioned() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("flat", &builds));
    reg.register("nodes.compute.text_filter.v1_0_0.node", "NodeTextFilter", stub("v1", &builds));

    let node = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap();
    assert_eq!(node.module_path, "nodes.compute.text_filter.v1_0_0.node");
    assert_eq!(node.node.name(), "v1");
}

#[tokio::test]
async fn explicit_locations_take_precedence() {
    let root = tempfile::tempdir().unwrap();
    let body = format!("{TEXT_FILTER}implementation:\n  module_path: custom.filters\n");
    let path = write_contract(root.path(), "nodes/compute/text_filter", &body);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("layout", &builds));
    reg.register("custom.filters", "NodeTextFilter", stub("declared", &builds));
    reg.register("override.filters", "NodeTextFilter", stub("override", &builds));
    let r = resolver(reg, ServiceContainer::new());

    let declared = r.load_from_contract(&path, None).await.unwrap();
    assert_eq!(declared.module_path, "custom.filters");

    r.clear_cache();
    let overridden = r
        .load_from_contract(&path, Some("override.filters"))
        .await
        .unwrap();
    assert_eq!(overridden.node.name(), "override");
}

#[tokio::test]
async fn custom_entrypoint_and_missing_module() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("x", &builds));

    let err = resolver(reg, ServiceContainer::new())
        .with_config(ResolverConfig::default().with_entrypoint("main"))
        .load_from_contract(&path, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MODULE_NOT_FOUND");
    assert_eq!(
        err.details()["module"],
        serde_json::json!("nodes.compute.text_filter.v1_0_0.main")
    );
}

#[tokio::test]
async fn contract_load_failure_is_wrapped() {
    let root = tempfile::tempdir().unwrap();
    let err = resolver(NodeRegistry::new(), ServiceContainer::new())
        .load_from_contract(root.path().join("nodes/compute/absent/contract.yaml"), None)
        .await
        .unwrap_err();
    match &err {
        KernelError::NodeLoad { code, details, .. } => {
            assert_eq!(*code, NodeLoadCode::ContractLoadFailed);
            assert_eq!(details["cause"], serde_json::json!("CONTRACT_VALIDATION"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

const WITH_DEPS: &str = "node_name: mailer\n\
node_type: EFFECT\n\
tool_specification:\n  main_tool_class: NodeMailer\n\
dependencies:\n\
\x20 - name: smtp\n    type: ProtocolSmtp\n\
\x20 - name: retries\n    type: ProtocolRetryPolicy\n    fallback: { max: 3 }\n\
\x20 - name: metrics\n    type: ProtocolMetrics\n";

#[tokio::test]
async fn fallback_is_bound_and_unresolved_dependency_is_absent() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/effect/mailer", WITH_DEPS);

    let container = ServiceContainer::new();
    container.register("ProtocolSmtp", String::from("smtp://localhost"));
    container.set_discovery(String::from("discovery"));

    let captured: Arc<std::sync::Mutex<Option<Dependencies>>> = Arc::default();
    let sink = captured.clone();
    let mut reg = NodeRegistry::new();
    reg.register(
        "nodes.effect.mailer.node",
        "NodeMailer",
        factory_fn(move |deps: &Dependencies| {
            *sink.lock().unwrap() = Some(deps.clone());
            Ok(Box::new(StubNode {
                label: "mailer".into(),
                dep_keys: deps.keys().map(String::from).collect(),
                contract: None,
            }))
        }),
    );

    let node = resolver(reg, container)
        .load_from_contract(&path, None)
        .await
        .unwrap();

    let deps = captured.lock().unwrap().clone().unwrap();
    assert_eq!(deps.service::<String>("smtp").as_deref().map(String::as_str), Some("smtp://localhost"));
    assert_eq!(deps.value("retries"), Some(&serde_json::json!({ "max": 3 })));
    assert!(!deps.contains("metrics"));
    assert!(deps.registry().is_some());

    let outcomes: Vec<_> = node
        .dependencies
        .iter()
        .map(|r| (r.name.as_str(), &r.outcome))
        .collect();
    assert_eq!(outcomes[0], ("smtp", &DependencyOutcome::Resolved));
    assert!(matches!(outcomes[1], ("retries", DependencyOutcome::FallbackUsed { .. })));
    assert!(matches!(outcomes[2], ("metrics", DependencyOutcome::Omitted { .. })));
    assert_eq!(outcomes[3], (REGISTRY_KEY, &DependencyOutcome::Resolved));
}

#[tokio::test]
async fn strict_mode_rejects_omitted_required_dependency() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/effect/mailer", WITH_DEPS);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.effect.mailer.node", "NodeMailer", stub("mailer", &builds));
    let container = ServiceContainer::new();
    container.register("ProtocolSmtp", 1u8);

    let err = resolver(reg, container)
        .with_config(ResolverConfig::default().with_strict_dependencies(true))
        .load_from_contract(&path, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DEPENDENCY_UNRESOLVED");
    assert_eq!(err.details()["dependency"], serde_json::json!("metrics"));
    assert_eq!(builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn strict_mode_tolerates_optional_dependency() {
    let root = tempfile::tempdir().unwrap();
    let body = "node_name: mailer\n\
tool_specification:\n  main_tool_class: NodeMailer\n\
dependencies:\n  - { name: metrics, type: ProtocolMetrics, optional: true }\n";
    let path = write_contract(root.path(), "nodes/effect/mailer", body);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.effect.mailer.node", "NodeMailer", stub("mailer", &builds));

    let node = resolver(reg, ServiceContainer::new())
        .with_config(ResolverConfig::default().with_strict_dependencies(true))
        .load_from_contract(&path, None)
        .await
        .unwrap();
    assert!(matches!(node.dependencies[0].outcome, DependencyOutcome::Omitted { .. }));
}

// ---------------------------------------------------------------------------
// Instantiation and caching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instantiation_failure_carries_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let mut reg = NodeRegistry::new();
    reg.register(
        "nodes.compute.text_filter.node",
        "NodeTextFilter",
        factory_fn(|_| Err(KernelError::Other("missing config".into()))),
    );

    let err = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSTANTIATION_FAILED");
    assert_eq!(err.details()["node_class"], serde_json::json!("NodeTextFilter"));
    assert!(err.details().contains_key("available_deps"));
}

#[tokio::test]
async fn resolved_node_is_cached_by_name() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("tf", &builds));
    let r = resolver(reg, ServiceContainer::new());

    let first = r.load_from_contract(&path, None).await.unwrap();
    let second = r.load_from_contract(&path, None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(r.cached("text_filter").is_some());

    r.clear_cache();
    assert!(r.cached("text_filter").is_none());
    let third = r.load_from_contract(&path, None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn contract_is_attached_and_compliance_reported() {
    let root = tempfile::tempdir().unwrap();
    let path = write_contract(root.path(), "nodes/compute/text_filter", TEXT_FILTER);

    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("nodes.compute.text_filter.node", "NodeTextFilter", stub("tf", &builds));

    let node = resolver(reg, ServiceContainer::new())
        .load_from_contract(&path, None)
        .await
        .unwrap();
    assert!(node.contract_attached);
    let config = node.node.config().unwrap();
    assert_eq!(config["contract"], serde_json::json!("text_filter"));
    assert!(!node.compliance.is_compliant());
    assert_eq!(node.compliance.missing, vec!["input_schema", "output_schema"]);
}

#[tokio::test]
async fn inline_spec_skips_contract_loading() {
    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("plugins.echo", "NodeEcho", stub("echo", &builds));
    let r = resolver(reg, ServiceContainer::new());

    let node = r.load_from_spec("echo", "NodeEcho", "plugins.echo").await.unwrap();
    assert_eq!(node.module_path, "plugins.echo");
    assert_eq!(node.name(), "echo");
    assert_eq!(r.store().stats().parses, 0);

    // Only the registry slot is attempted, and discovery is not configured.
    let config = node.node.config().unwrap();
    assert_eq!(config["dep_keys"], serde_json::json!([]));
}

#[tokio::test]
async fn resolved_node_runs_in_pipeline() {
    let builds = Arc::new(AtomicUsize::new(0));
    let mut reg = NodeRegistry::new();
    reg.register("plugins.echo", "NodeEcho", stub("echo", &builds));
    let node = resolver(reg, ServiceContainer::new())
        .load_from_spec("echo", "NodeEcho", "plugins.echo")
        .await
        .unwrap();

    let mut callables = CallableRegistry::new();
    let hook = node.register_run(&mut callables);
    let plan = ExecutionPlan::builder()
        .hook(Phase::Execute, hook)
        .build()
        .unwrap();
    let mut runner = PipelineRunner::new(Arc::new(plan), Arc::new(callables)).unwrap();

    let result = runner.run().await.unwrap();
    assert!(result.success);
    assert_eq!(result.context["ran_by"], serde_json::json!("echo"));
    assert_eq!(result.executed, vec!["echo.run"]);
}
