//! CLI binary for inspecting Keel contracts, envelopes, and execution plans.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use keel_contract::{bracket_depth, ContractStore, ScreeningLimits};
use keel_envelope::{Envelope, EnvelopeValidationConfig, EnvelopeValidator};
use keel_pipeline::{CallableRegistry, ExecutionPlan, HookBody, Phase, PipelineRunner, RunnerConfig};
use keel_resolver::{convention_variants, module_candidates};

#[derive(Parser)]
#[command(name = "keel", version, about = "Contract-driven execution kernel tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and screen a contract document
    Validate {
        /// Path to the contract YAML file
        contract: PathBuf,

        /// Maximum document size in bytes
        #[arg(long)]
        max_bytes: Option<usize>,

        /// Maximum bracket nesting depth
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Show a contract and where its implementation is looked up
    Info {
        /// Path to the contract YAML file
        contract: PathBuf,

        /// Module entrypoint used for derived locations
        #[arg(long, default_value = "node")]
        entrypoint: String,
    },

    /// Validate a JSON envelope
    Envelope {
        /// Path to the envelope JSON file
        envelope: PathBuf,

        /// Use the strict profile
        #[arg(long)]
        strict: bool,

        /// Require target_node and envelope_version (strict only)
        #[arg(long)]
        require_all_optional: bool,
    },

    /// Show an execution plan, optionally running it with no-op hooks
    Plan {
        /// Path to the plan YAML file
        plan: PathBuf,

        /// Run the plan with every callable bound to a logging no-op
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Validate {
            contract,
            max_bytes,
            max_depth,
        } => cmd_validate(&contract, max_bytes, max_depth).await?,
        Commands::Info {
            contract,
            entrypoint,
        } => cmd_info(&contract, &entrypoint).await?,
        Commands::Envelope {
            envelope,
            strict,
            require_all_optional,
        } => cmd_envelope(&envelope, strict, require_all_optional)?,
        Commands::Plan { plan, dry_run } => cmd_plan(&plan, dry_run).await?,
    }

    Ok(())
}

async fn cmd_validate(path: &Path, max_bytes: Option<usize>, max_depth: Option<usize>) -> anyhow::Result<()> {
    let mut limits = ScreeningLimits::new();
    if let Some(bytes) = max_bytes {
        limits = limits.with_max_bytes(bytes);
    }
    if let Some(depth) = max_depth {
        limits = limits.with_max_depth(depth);
    }

    let store = ContractStore::with_limits(limits);
    match store.load(path).await {
        Ok(contract) => {
            let document = store.load_document(path).await?;
            let text = std::fs::read_to_string(path)?;
            println!("Contract is valid: {}", contract.node_name);
            println!("  size:    {} bytes", document.file_size);
            println!("  nesting: {}", bracket_depth(&text));
            println!("  sha256:  {}", document.content_hash);
            Ok(())
        }
        Err(err) => {
            println!("[ERROR] {}: {}", err.code(), err);
            std::process::exit(1);
        }
    }
}

async fn cmd_info(path: &Path, entrypoint: &str) -> anyhow::Result<()> {
    let contract = ContractStore::new().load(path).await?;

    println!("Node: {}", contract.node_name);
    println!("Type: {}", contract.node_type.pascal());
    println!("Version: {}", contract.contract_version);
    println!("Implementation: {}", contract.tool_specification.main_tool_class);
    println!("Logic: {}", contract.tool_specification.business_logic_pattern);

    let requests = contract.dependency_requests();
    if !requests.is_empty() {
        println!("\nDependencies:");
        for req in &requests {
            let binding = req.binding.as_deref().unwrap_or("-");
            let fallback = if req.fallback.is_some() { " (fallback)" } else { "" };
            let optional = if req.optional { " (optional)" } else { "" };
            println!("  {} <- {} [{}]{}{}", req.name, req.protocol, binding, fallback, optional);
        }
    }

    println!("\nModule lookup order:");
    match contract.module_path() {
        Some(declared) => println!("  {declared} (declared)"),
        None => {
            for candidate in module_candidates(Some(path), &contract, entrypoint).await {
                println!("  {candidate}");
            }
        }
    }

    println!("\nType lookup order:");
    println!("  {} (exact)", contract.tool_specification.main_tool_class);
    for variant in convention_variants(&contract) {
        println!("  {variant}");
    }
    println!("  Node* (first match, excluding NodeBase)");

    Ok(())
}

fn cmd_envelope(path: &Path, strict: bool, require_all_optional: bool) -> anyhow::Result<()> {
    let envelope = Envelope::from_json(&std::fs::read_to_string(path)?)?;
    let config = if strict {
        EnvelopeValidationConfig::strict()
    } else {
        EnvelopeValidationConfig::lenient()
    }
    .with_require_all_optional_fields(require_all_optional)
    .with_log_warnings(false);

    match EnvelopeValidator::new(config).validate(&envelope, None) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "code": err.code(),
                "message": err.to_string(),
                "details": err.details(),
            }))?);
            std::process::exit(1);
        }
    }
}

async fn cmd_plan(path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let plan = ExecutionPlan::from_yaml(&std::fs::read_to_string(path)?)?;

    println!("Hooks: {}", plan.hook_count());
    for phase in Phase::ALL {
        let policy = if plan.fail_fast(phase) { "fail-fast" } else { "continue" };
        println!("{phase} [{policy}]");
        for hook in plan.hooks(phase) {
            match hook.timeout_seconds {
                Some(secs) => println!("  {} -> {} (timeout {secs}s)", hook.hook_id, hook.callable_ref),
                None => println!("  {} -> {}", hook.hook_id, hook.callable_ref),
            }
        }
    }

    if !dry_run {
        return Ok(());
    }

    let mut registry = CallableRegistry::new();
    for callable_ref in plan.callable_refs() {
        let name = callable_ref.to_string();
        registry.register(
            callable_ref,
            HookBody::from_async(move |_ctx| {
                let name = name.clone();
                async move {
                    tracing::info!(callable = %name, "Dry-run hook invoked");
                    Ok(())
                }
            }),
        );
    }

    let mut runner = PipelineRunner::with_config(Arc::new(plan), Arc::new(registry), RunnerConfig::default())?;
    let result = runner.run().await?;
    println!("\nExecuted: {}", result.executed.join(", "));
    Ok(())
}
