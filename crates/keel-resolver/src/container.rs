//! Dependency-injection container boundary.
//!
//! The resolver only talks to the [`Container`] trait. [`ServiceContainer`] is
//! the in-memory implementation used for wiring and tests.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use keel_types::{KernelError, Result};

/// A type-erased service instance. Downcast with [`Arc::downcast`].
pub type ServiceRef = Arc<dyn Any + Send + Sync>;

/// Service locator consulted for every contract-declared dependency.
pub trait Container: Send + Sync {
    /// Look up a service by protocol and optional named binding.
    fn get_service(&self, protocol: &str, name: Option<&str>) -> Result<ServiceRef>;

    /// The service-discovery registry bound to every node as `registry`.
    fn service_discovery(&self) -> Result<ServiceRef>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    protocol: String,
    binding: Option<String>,
}

/// In-memory [`Container`]. Unnamed lookups use the unnamed registration;
/// named lookups fall back to it when no named binding exists.
#[derive(Default)]
pub struct ServiceContainer {
    services: RwLock<HashMap<ServiceKey, ServiceRef>>,
    discovery: RwLock<Option<ServiceRef>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, protocol: impl Into<String>, service: T) {
        self.register_ref(protocol, None, Arc::new(service));
    }

    pub fn register_named<T: Any + Send + Sync>(
        &self,
        protocol: impl Into<String>,
        binding: impl Into<String>,
        service: T,
    ) {
        self.register_ref(protocol, Some(binding.into()), Arc::new(service));
    }

    pub fn register_ref(&self, protocol: impl Into<String>, binding: Option<String>, service: ServiceRef) {
        let key = ServiceKey {
            protocol: protocol.into(),
            binding,
        };
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, service);
    }

    pub fn set_discovery<T: Any + Send + Sync>(&self, registry: T) {
        *self.discovery.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(registry));
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Container for ServiceContainer {
    fn get_service(&self, protocol: &str, name: Option<&str>) -> Result<ServiceRef> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        let lookup = |binding: Option<&str>| {
            services
                .get(&ServiceKey {
                    protocol: protocol.to_string(),
                    binding: binding.map(String::from),
                })
                .cloned()
        };
        name.and_then(|n| lookup(Some(n)))
            .or_else(|| lookup(None))
            .ok_or_else(|| KernelError::ServiceUnavailable {
                protocol: protocol.to_string(),
                binding: name.map(String::from),
                message: "no service registered".into(),
            })
    }

    fn service_discovery(&self) -> Result<ServiceRef> {
        self.discovery
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| KernelError::ServiceUnavailable {
                protocol: "registry".into(),
                binding: None,
                message: "service discovery is not configured".into(),
            })
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.len())
            .finish_non_exhaustive()
    }
}
