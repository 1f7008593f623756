//! Implementation location and type-name resolution.
//!
//! Contracts live at `.../nodes/<category>/<name>/[<version>/]contract.yaml`.
//! The implementation module mirrors that layout as a dotted path, e.g.
//! `nodes.compute.text_filter.v1_0_0.node`.

use std::path::{Component, Path};

use serde::Serialize;

use keel_contract::{parse_version_dir, Contract, ContractVersion};

use crate::node::{NodeModule, NODE_BASE};

const NODES_DIR: &str = "nodes";
const NODE_MARKER: &str = "Node";

/// Lower-case a name and replace spaces with underscores.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// `text_filter` / `text filter` / `text-filter` → `TextFilter`.
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == ' ' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Module location
// ---------------------------------------------------------------------------

/// Where a contract's `nodes/<category>/<name>` directory sits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeDir {
    category: String,
    name: String,
    /// Set when the contract itself lives inside a version directory.
    version_dir: Option<String>,
}

fn node_dir(contract_path: &Path) -> Option<NodeDir> {
    let parts: Vec<String> = contract_path
        .parent()?
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(String::from),
            _ => None,
        })
        .collect();
    let start = parts.iter().rposition(|p| p == NODES_DIR)?;
    let rest = &parts[start + 1..];
    match rest {
        [category, name] => Some(NodeDir {
            category: category.clone(),
            name: name.clone(),
            version_dir: None,
        }),
        [category, name, version] if parse_version_dir(version).is_some() => Some(NodeDir {
            category: category.clone(),
            name: name.clone(),
            version_dir: Some(version.clone()),
        }),
        _ => None,
    }
}

/// Version directories next to the contract, newest first.
async fn version_dirs_on_disk(dir: &Path) -> Vec<String> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut found: Vec<(ContractVersion, String)> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if let (true, Some(version)) = (is_dir, parse_version_dir(&name)) {
            found.push((version, name));
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    found.into_iter().map(|(_, name)| name).collect()
}

/// Candidate module paths for a contract, most preferred first.
///
/// Versioned candidates come before the unversioned one: first the contract's
/// own `contract_version`, then any other version directories that exist on
/// disk beside the contract.
pub async fn module_candidates(contract_path: Option<&Path>, contract: &Contract, entrypoint: &str) -> Vec<String> {
    let declared = contract.contract_version.dir_name();
    let mut candidates = Vec::new();
    let mut push = |path: String| {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    };

    match contract_path.and_then(node_dir) {
        Some(NodeDir {
            category,
            name,
            version_dir: Some(version),
        }) => {
            push(format!("{NODES_DIR}.{category}.{name}.{version}.{entrypoint}"));
            push(format!("{NODES_DIR}.{category}.{name}.{entrypoint}"));
        }
        Some(NodeDir { category, name, .. }) => {
            let base = format!("{NODES_DIR}.{category}.{name}");
            push(format!("{base}.{declared}.{entrypoint}"));
            if let Some(dir) = contract_path.and_then(Path::parent) {
                for version in version_dirs_on_disk(dir).await {
                    push(format!("{base}.{version}.{entrypoint}"));
                }
            }
            push(format!("{base}.{entrypoint}"));
        }
        None => {
            let base = format!(
                "{NODES_DIR}.{}.{}",
                contract.node_type.category(),
                normalize_name(&contract.node_name)
            );
            push(format!("{base}.{declared}.{entrypoint}"));
            push(format!("{base}.{entrypoint}"));
        }
    }
    candidates
}

// ---------------------------------------------------------------------------
// Type resolution
// ---------------------------------------------------------------------------

/// How the implementation type was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", content = "variant", rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Convention(String),
    Scan,
}

/// Naming-convention variants for a node, in lookup order.
pub fn convention_variants(contract: &Contract) -> Vec<String> {
    let x = pascal_case(&contract.node_name);
    let kind = contract.node_type.pascal();
    let mut variants = Vec::new();
    for v in [
        format!("{NODE_MARKER}{x}"),
        format!("{x}{NODE_MARKER}"),
        format!("{NODE_MARKER}{x}{kind}"),
        format!("{x}{kind}{NODE_MARKER}"),
    ] {
        if !variants.contains(&v) {
            variants.push(v);
        }
    }
    variants
}

/// Pick the implementation type within `module`: exact `expected` name, then
/// convention variants, then the first `Node*` type that is not the base.
pub fn resolve_type(module: &NodeModule, expected: &str, contract: &Contract) -> Option<(String, MatchStrategy)> {
    if module.contains(expected) {
        return Some((expected.to_string(), MatchStrategy::Exact));
    }
    for variant in convention_variants(contract) {
        if module.contains(&variant) {
            return Some((variant.clone(), MatchStrategy::Convention(variant)));
        }
    }
    module
        .type_names()
        .find(|name| name.starts_with(NODE_MARKER) && *name != NODE_BASE)
        .map(|name| (name.to_string(), MatchStrategy::Scan))
}
