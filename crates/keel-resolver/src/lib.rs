//! Node resolution for the Keel execution kernel.
//!
//! A [`NodeResolver`] turns a contract into a constructed [`Node`]: it locates
//! the implementation module in a [`NodeRegistry`], picks the implementation
//! type, injects dependencies from a [`Container`], and caches the result by
//! node name. Each dependency's fate is reported as a [`DependencyOutcome`].

pub mod container;
pub mod deps;
pub mod locate;
pub mod node;
pub mod resolver;

pub use container::{Container, ServiceContainer, ServiceRef};
pub use deps::{Dependencies, DependencyOutcome, DependencyReport, DependencyValue, REGISTRY_KEY};
pub use locate::{convention_variants, module_candidates, normalize_name, pascal_case, MatchStrategy};
pub use node::{factory_fn, FnFactory, Node, NodeFactory, NodeModule, NodeRegistry, NODE_BASE};
pub use resolver::{ComplianceReport, NodeResolver, ResolvedNode, ResolverConfig};
