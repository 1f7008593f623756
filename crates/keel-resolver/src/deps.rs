//! Resolved dependency sets and per-dependency outcomes.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::container::{Container, ServiceRef};

/// Key under which the container's service-discovery registry is bound.
pub const REGISTRY_KEY: &str = "registry";

/// A value bound into a node's dependency set.
#[derive(Clone)]
pub enum DependencyValue {
    /// Instance returned by the container.
    Service(ServiceRef),
    /// Contract-declared fallback used after a failed lookup.
    Value(serde_json::Value),
}

impl std::fmt::Debug for DependencyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyValue::Service(_) => f.write_str("Service(..)"),
            DependencyValue::Value(v) => write!(f, "Value({v})"),
        }
    }
}

/// What happened to one declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DependencyOutcome {
    Resolved,
    FallbackUsed { reason: String },
    Omitted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub name: String,
    pub protocol: String,
    pub optional: bool,
    #[serde(flatten)]
    pub outcome: DependencyOutcome,
}

/// Everything a [`NodeFactory`](crate::NodeFactory) receives at construction:
/// the resolved dependencies (omitted ones are absent) and the container.
#[derive(Clone)]
pub struct Dependencies {
    values: BTreeMap<String, DependencyValue>,
    container: Arc<dyn Container>,
}

impl Dependencies {
    pub fn new(container: Arc<dyn Container>) -> Self {
        Self {
            values: BTreeMap::new(),
            container,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: DependencyValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&DependencyValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Downcast a container-provided service.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.values.get(name)? {
            DependencyValue::Service(s) => s.clone().downcast::<T>().ok(),
            DependencyValue::Value(_) => None,
        }
    }

    /// A fallback value bound under `name`.
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        match self.values.get(name)? {
            DependencyValue::Value(v) => Some(v),
            DependencyValue::Service(_) => None,
        }
    }

    /// The service-discovery registry, when the container provided one.
    pub fn registry(&self) -> Option<&ServiceRef> {
        match self.values.get(REGISTRY_KEY)? {
            DependencyValue::Service(s) => Some(s),
            DependencyValue::Value(_) => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}
