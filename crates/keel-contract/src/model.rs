//! Typed contract record.
//!
//! A contract names a node, its category, the implementation type that backs
//! it, and the dependencies it expects to be injected. Contracts are built once
//! by the [`ContractStore`](crate::ContractStore) and shared immutably.

use serde::{Deserialize, Serialize};

use crate::version::parse_version;

// ---------------------------------------------------------------------------
// ContractVersion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr")]
pub struct ContractVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Contracts may spell the version as a map or as a dotted string.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Parts { major: u32, minor: u32, patch: u32 },
    Text(String),
}

impl TryFrom<VersionRepr> for ContractVersion {
    type Error = String;

    fn try_from(repr: VersionRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            VersionRepr::Parts {
                major,
                minor,
                patch,
            } => Ok(ContractVersion::new(major, minor, patch)),
            VersionRepr::Text(text) => parse_version(&text).map_err(|e| e.to_string()),
        }
    }
}

impl ContractVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Directory name used by the versioned node layout, e.g. `v1_0_0`.
    pub fn dir_name(&self) -> String {
        format!("v{}_{}_{}", self.major, self.minor, self.patch)
    }
}

impl Default for ContractVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl std::fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    #[default]
    #[serde(alias = "compute")]
    Compute,
    #[serde(alias = "effect")]
    Effect,
    #[serde(alias = "reducer")]
    Reducer,
    #[serde(alias = "orchestrator")]
    Orchestrator,
}

impl NodeType {
    /// Lower-case category used in module paths (`compute`, `effect`, ...).
    pub fn category(&self) -> &'static str {
        match self {
            NodeType::Compute => "compute",
            NodeType::Effect => "effect",
            NodeType::Reducer => "reducer",
            NodeType::Orchestrator => "orchestrator",
        }
    }

    /// PascalCase form used in implementation type naming conventions.
    pub fn pascal(&self) -> &'static str {
        match self {
            NodeType::Compute => "Compute",
            NodeType::Effect => "Effect",
            NodeType::Reducer => "Reducer",
            NodeType::Orchestrator => "Orchestrator",
        }
    }
}

// ---------------------------------------------------------------------------
// ToolSpecification / Implementation
// ---------------------------------------------------------------------------

fn default_business_logic_pattern() -> String {
    "stateful".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpecification {
    pub main_tool_class: String,
    #[serde(default = "default_business_logic_pattern")]
    pub business_logic_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(default)]
    pub module_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// A dependency entry as written in the contract document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// `- logger`
    Name(String),
    /// `- { name, type, class_name, module, ... }`
    Structured(StructuredDependency),
    /// Any other mapping; interpreted leniently.
    Loose(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredDependency {
    pub name: String,
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default)]
    pub fallback: Option<serde_json::Value>,
    #[serde(default)]
    pub optional: bool,
}

/// Normalized view of a dependency, independent of how it was spelled.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyRequest {
    /// Key the resolved value is bound under.
    pub name: String,
    /// Protocol (service type) requested from the container.
    pub protocol: String,
    /// Optional named binding within the protocol.
    pub binding: Option<String>,
    pub fallback: Option<serde_json::Value>,
    pub optional: bool,
}

impl DependencySpec {
    /// Normalize the entry. Loose maps without a usable `name` are logged and
    /// yield `None`.
    pub fn request(&self) -> Option<DependencyRequest> {
        match self {
            DependencySpec::Name(name) => Some(DependencyRequest {
                name: name.clone(),
                protocol: name.clone(),
                binding: None,
                fallback: None,
                optional: false,
            }),
            DependencySpec::Structured(dep) => Some(DependencyRequest {
                name: dep.name.clone(),
                protocol: dep.protocol.clone(),
                binding: dep.binding.clone(),
                fallback: dep.fallback.clone(),
                optional: dep.optional,
            }),
            DependencySpec::Loose(map) => {
                let named = map
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|n| !n.is_empty());
                let Some(name) = named else {
                    tracing::warn!(entry = ?map, "Dropping dependency entry without a usable name");
                    return None;
                };
                let text = |key: &str| map.get(key).and_then(|v| v.as_str()).map(String::from);
                Some(DependencyRequest {
                    name: name.to_string(),
                    protocol: text("type")
                        .or_else(|| text("protocol"))
                        .unwrap_or_else(|| name.to_string()),
                    binding: text("binding"),
                    fallback: map.get("fallback").filter(|v| !v.is_null()).cloned(),
                    optional: map
                        .get("optional")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub contract_version: ContractVersion,
    pub node_name: String,
    #[serde(default)]
    pub node_type: NodeType,
    pub tool_specification: ToolSpecification,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub implementation: Option<Implementation>,
    #[serde(default)]
    pub definitions: Option<serde_json::Value>,
    #[serde(default)]
    pub input_state: Option<serde_json::Value>,
    #[serde(default)]
    pub output_state: Option<serde_json::Value>,
}

impl Contract {
    /// Minimal contract for nodes wired from an inline spec rather than a
    /// contract document.
    pub fn synthetic(
        node_name: impl Into<String>,
        main_tool_class: impl Into<String>,
        module_path: impl Into<String>,
    ) -> Self {
        Self {
            contract_version: ContractVersion::default(),
            node_name: node_name.into(),
            node_type: NodeType::default(),
            tool_specification: ToolSpecification {
                main_tool_class: main_tool_class.into(),
                business_logic_pattern: default_business_logic_pattern(),
            },
            dependencies: Vec::new(),
            implementation: Some(Implementation {
                module_path: Some(module_path.into()),
            }),
            definitions: None,
            input_state: None,
            output_state: None,
        }
    }

    /// Explicit implementation module declared on the contract, if any.
    pub fn module_path(&self) -> Option<&str> {
        self.implementation
            .as_ref()
            .and_then(|i| i.module_path.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    /// Normalized dependency requests, in declaration order.
    pub fn dependency_requests(&self) -> Vec<DependencyRequest> {
        self.dependencies.iter().filter_map(DependencySpec::request).collect()
    }
}
