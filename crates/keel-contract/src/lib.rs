//! Contract documents for Keel nodes.
//!
//! A contract is a YAML document naming a node, its category, its
//! implementation type and its dependencies. [`ContractStore`] loads contracts
//! from disk, screens the raw text for size and nesting hazards before parsing,
//! and caches both the parsed document and the typed [`Contract`].
//!
//! # Example
//! ```no_run
//! # async fn demo() -> keel_types::Result<()> {
//! let store = keel_contract::ContractStore::new();
//! let contract = store.load("nodes/compute/text_filter/contract.yaml").await?;
//! assert_eq!(contract.node_type, keel_contract::NodeType::Compute);
//! # Ok(())
//! # }
//! ```

pub mod model;
pub mod screen;
pub mod store;
mod version;

pub use model::{
    Contract, ContractVersion, DependencyRequest, DependencySpec, Implementation, NodeType,
    StructuredDependency, ToolSpecification,
};
pub use screen::{bracket_depth, screen, ScreenReport, ScreeningLimits};
pub use store::{CacheStats, CachedDocument, ContractStore};
pub use version::{parse_version, parse_version_dir};
