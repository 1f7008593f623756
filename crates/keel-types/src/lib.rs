//! Shared types, errors, context, and caching for the Keel execution kernel.
//!
//! This crate provides the foundational types used across all other Keel crates:
//! - `KernelError`: unified error taxonomy with machine-readable codes
//! - `Context`: thread-safe key-value bag shared by pipeline hooks
//! - `LoadCache`: single-flight keyed cache used by the contract store and resolver

pub mod cache;

pub use cache::LoadCache;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Machine-readable failure codes carried by [`KernelError::NodeLoad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeLoadCode {
    ContractLoadFailed,
    ModuleNotFound,
    TypeNotFound,
    InstantiationFailed,
    DependencyUnresolved,
}

impl NodeLoadCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLoadCode::ContractLoadFailed => "CONTRACT_LOAD_FAILED",
            NodeLoadCode::ModuleNotFound => "MODULE_NOT_FOUND",
            NodeLoadCode::TypeNotFound => "TYPE_NOT_FOUND",
            NodeLoadCode::InstantiationFailed => "INSTANTIATION_FAILED",
            NodeLoadCode::DependencyUnresolved => "DEPENDENCY_UNRESOLVED",
        }
    }
}

impl std::fmt::Display for NodeLoadCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail map attached to structured errors.
pub type Details = BTreeMap<String, serde_json::Value>;

/// Unified error type for all Keel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // === Contract Errors ===
    #[error("Contract validation failed for {path}: {message}")]
    ContractValidation { path: String, message: String },

    #[error("Contract {path} is too large: {size} bytes exceeds limit of {limit} bytes")]
    ContractTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("Contract {path} nesting depth {depth} exceeds limit of {limit}")]
    NestingTooDeep {
        path: String,
        depth: usize,
        limit: usize,
    },

    #[error("Invalid contract version '{input}': {message}")]
    VersionParse { input: String, message: String },

    // === Node Loading Errors ===
    #[error("Node load failed [{code}]: {message}")]
    NodeLoad {
        code: NodeLoadCode,
        message: String,
        details: Details,
    },

    #[error("Service '{protocol}' unavailable: {message}")]
    ServiceUnavailable {
        protocol: String,
        binding: Option<String>,
        message: String,
    },

    // === Pipeline Errors ===
    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("Execution plan references unknown callable(s): {}", .missing.join(", "))]
    UnknownCallables { missing: Vec<String> },

    #[error("Hook '{hook_id}' timed out after {timeout_ms}ms")]
    HookTimeout { hook_id: String, timeout_ms: u64 },

    #[error("{message}")]
    HookFailed { error_type: String, message: String },

    // === Envelope Errors ===
    #[error("Envelope {envelope_id} failed validation: {}", .violations.join("; "))]
    EnvelopeValidation {
        envelope_id: String,
        violations: Vec<String>,
    },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl KernelError {
    /// Build a [`KernelError::NodeLoad`] with an empty detail map.
    pub fn node_load(code: NodeLoadCode, message: impl Into<String>) -> Self {
        KernelError::NodeLoad {
            code,
            message: message.into(),
            details: Details::new(),
        }
    }

    /// Build a hook-body failure with an explicit error type name.
    pub fn hook(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        KernelError::HookFailed {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Attach a detail entry. Only `NodeLoad` carries a free-form detail map;
    /// other variants are returned unchanged.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let KernelError::NodeLoad { details, .. } = &mut self {
            details.insert(key.into(), value.into());
        }
        self
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::ContractValidation { .. } => "CONTRACT_VALIDATION",
            KernelError::ContractTooLarge { .. } => "CONTRACT_TOO_LARGE",
            KernelError::NestingTooDeep { .. } => "CONTRACT_NESTING_TOO_DEEP",
            KernelError::VersionParse { .. } => "CONTRACT_VERSION_INVALID",
            KernelError::NodeLoad { code, .. } => code.as_str(),
            KernelError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            KernelError::InvalidPlan(_) => "INVALID_PLAN",
            KernelError::UnknownCallables { .. } => "UNKNOWN_CALLABLE",
            KernelError::HookTimeout { .. } => "HOOK_TIMEOUT",
            KernelError::HookFailed { .. } => "HOOK_FAILED",
            KernelError::EnvelopeValidation { .. } => "ENVELOPE_INVALID",
            KernelError::Io(_) => "IO",
            KernelError::Json(_) => "JSON",
            KernelError::Yaml(_) => "YAML",
            KernelError::Other(_) => "OTHER",
        }
    }

    /// Structured detail map for the error.
    pub fn details(&self) -> Details {
        let mut map = Details::new();
        match self {
            KernelError::NodeLoad { details, .. } => return details.clone(),
            KernelError::ContractTooLarge { size, limit, .. } => {
                map.insert("size".into(), (*size).into());
                map.insert("limit".into(), (*limit).into());
            }
            KernelError::NestingTooDeep { depth, limit, .. } => {
                map.insert("depth".into(), (*depth).into());
                map.insert("limit".into(), (*limit).into());
            }
            KernelError::ServiceUnavailable {
                protocol, binding, ..
            } => {
                map.insert("protocol".into(), protocol.clone().into());
                if let Some(b) = binding {
                    map.insert("binding".into(), b.clone().into());
                }
            }
            KernelError::UnknownCallables { missing } => {
                map.insert("missing".into(), serde_json::json!(missing));
            }
            KernelError::HookTimeout {
                hook_id,
                timeout_ms,
            } => {
                map.insert("hook_id".into(), hook_id.clone().into());
                map.insert("timeout_ms".into(), (*timeout_ms).into());
            }
            KernelError::EnvelopeValidation {
                envelope_id,
                violations,
            } => {
                map.insert("envelope_id".into(), envelope_id.clone().into());
                map.insert("violations".into(), serde_json::json!(violations));
            }
            _ => {}
        }
        map
    }

    /// Type name recorded in captured hook errors.
    pub fn error_type(&self) -> &str {
        match self {
            KernelError::HookFailed { error_type, .. } => error_type,
            KernelError::HookTimeout { .. } => "HookTimeout",
            KernelError::ContractValidation { .. } => "ContractValidation",
            KernelError::ContractTooLarge { .. } => "ContractTooLarge",
            KernelError::NestingTooDeep { .. } => "NestingTooDeep",
            KernelError::VersionParse { .. } => "VersionParse",
            KernelError::NodeLoad { .. } => "NodeLoad",
            KernelError::ServiceUnavailable { .. } => "ServiceUnavailable",
            KernelError::InvalidPlan(_) => "InvalidPlan",
            KernelError::UnknownCallables { .. } => "UnknownCallables",
            KernelError::EnvelopeValidation { .. } => "EnvelopeValidation",
            KernelError::Io(_) => "Io",
            KernelError::Json(_) => "Json",
            KernelError::Yaml(_) => "Yaml",
            KernelError::Other(_) => "Other",
        }
    }

    /// Returns `true` for the timeout raised by the pipeline runner.
    pub fn is_timeout(&self) -> bool {
        matches!(self, KernelError::HookTimeout { .. })
    }
}

/// A convenience alias for `Result<T, KernelError>`.
pub type Result<T> = std::result::Result<T, KernelError>;

// ---------------------------------------------------------------------------
// Context: thread-safe key-value bag for a pipeline run
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe key-value store shared by the hooks of one pipeline run.
///
/// Cloning a `Context` yields another handle to the **same** inner state, so
/// a clone can be moved into a spawned hook task and its writes stay visible
/// to the run.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<HashMap<String, serde_json::Value>>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::from_values(HashMap::new())
    }

    /// Create a context seeded with `values`.
    pub fn from_values(values: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(values)),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.get(key).cloned()
    }

    /// Blocking variant of [`set`](Context::set) for hooks running on the
    /// blocking pool. Must not be called from inside an async task.
    pub fn set_blocking(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.blocking_write().insert(key.into(), value);
    }

    /// Blocking variant of [`get`](Context::get).
    pub fn get_blocking(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.blocking_read().get(key).cloned()
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}
