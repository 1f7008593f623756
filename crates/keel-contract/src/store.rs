//! Cached contract loading.
//!
//! Two cache tiers, both keyed by canonical path and both invalidated when the
//! file's modification time moves past the one recorded at load time:
//! - documents: screened, parsed YAML plus file metadata and content hash
//! - contracts: the typed [`Contract`] built from a document

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use keel_types::{KernelError, LoadCache, Result};

use crate::model::Contract;
use crate::screen::{screen, ScreeningLimits};

/// A screened and parsed contract document.
#[derive(Debug, Clone)]
pub struct CachedDocument {
    pub path: PathBuf,
    pub content: serde_yaml::Value,
    pub cached_at: DateTime<Utc>,
    pub file_modified_at: SystemTime,
    pub file_size: u64,
    /// Hex SHA-256 of the raw text.
    pub content_hash: String,
}

impl CachedDocument {
    /// A cached document is reusable while the file has not been modified
    /// after the recorded time.
    pub fn is_fresh(&self, current_modified: SystemTime) -> bool {
        current_modified <= self.file_modified_at
    }
}

#[derive(Clone)]
struct ContractEntry {
    contract: Arc<Contract>,
    file_modified_at: SystemTime,
    content_hash: String,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of YAML parses performed.
    pub parses: u64,
    pub document_hits: u64,
    pub contract_hits: u64,
    pub cached_documents: usize,
    pub cached_contracts: usize,
}

struct FileStamp {
    modified: SystemTime,
    len: u64,
}

/// Loads, screens, parses and caches contract documents.
pub struct ContractStore {
    limits: ScreeningLimits,
    documents: LoadCache<PathBuf, Arc<CachedDocument>>,
    contracts: LoadCache<PathBuf, ContractEntry>,
    // Documents visited while following `$ref`s; reset per contract.
    resolution_stack: Mutex<Vec<PathBuf>>,
    parses: AtomicU64,
    document_hits: AtomicU64,
    contract_hits: AtomicU64,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::with_limits(ScreeningLimits::default())
    }

    pub fn with_limits(limits: ScreeningLimits) -> Self {
        Self {
            limits,
            documents: LoadCache::new(),
            contracts: LoadCache::new(),
            resolution_stack: Mutex::new(Vec::new()),
            parses: AtomicU64::new(0),
            document_hits: AtomicU64::new(0),
            contract_hits: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &ScreeningLimits {
        &self.limits
    }

    /// Load the contract at `path`, returning the cached instance when the
    /// file has not changed since it was last parsed.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Arc<Contract>> {
        let (key, stamp) = stat(path.as_ref()).await?;
        let modified = stamp.modified;

        let (entry, hit) = self
            .contracts
            .get_or_load(
                &key,
                |entry| modified <= entry.file_modified_at,
                || async {
                    let document = self.document(&key, stamp).await?;
                    let contract = build_contract(&key, &document.content)?;
                    let contract = self.resolve_references(&key, contract);
                    Ok::<_, KernelError>(ContractEntry {
                        contract: Arc::new(contract),
                        file_modified_at: document.file_modified_at,
                        content_hash: document.content_hash.clone(),
                    })
                },
            )
            .await?;

        if hit {
            self.contract_hits.fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(
            path = %key.display(),
            node_name = %entry.contract.node_name,
            version = %entry.contract.contract_version,
            content_hash = %entry.content_hash,
            cache_hit = hit,
            "Contract loaded"
        );
        Ok(entry.contract)
    }

    /// Load only the screened, parsed document tier.
    pub async fn load_document(&self, path: impl AsRef<Path>) -> Result<Arc<CachedDocument>> {
        let (key, stamp) = stat(path.as_ref()).await?;
        self.document(&key, stamp).await
    }

    async fn document(&self, key: &Path, stamp: FileStamp) -> Result<Arc<CachedDocument>> {
        let modified = stamp.modified;
        let (document, hit) = self
            .documents
            .get_or_load(
                &key.to_path_buf(),
                |doc| doc.is_fresh(modified),
                || self.read_document(key, stamp),
            )
            .await?;
        if hit {
            self.document_hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(document)
    }

    async fn read_document(&self, path: &Path, stamp: FileStamp) -> Result<Arc<CachedDocument>> {
        let display = path.display().to_string();

        // Reject from metadata before reading an oversized file into memory.
        if stamp.len > self.limits.max_bytes as u64 {
            return Err(KernelError::ContractTooLarge {
                path: display,
                size: stamp.len as usize,
                limit: self.limits.max_bytes,
            });
        }

        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8(bytes).map_err(|_| KernelError::ContractValidation {
            path: display.clone(),
            message: "contract is not valid UTF-8".into(),
        })?;

        let report = screen(&display, &text, &self.limits)?;

        let content: serde_yaml::Value =
            serde_yaml::from_str(&text).map_err(|e| KernelError::ContractValidation {
                path: display.clone(),
                message: format!("malformed document: {e}"),
            })?;
        self.parses.fetch_add(1, Ordering::Relaxed);

        let content_hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        let path_str = &display;
        tracing::debug!(
            path = %path_str,
            size = report.size,
            depth = report.max_depth,
            hash = %content_hash,
            "Contract document parsed"
        );

        Ok(Arc::new(CachedDocument {
            path: path.to_path_buf(),
            content,
            cached_at: Utc::now(),
            file_modified_at: stamp.modified,
            file_size: text.len() as u64,
            content_hash,
        }))
    }

    /// Cross-document `$ref` resolution hook. References are currently left
    /// in place and the contract is returned unchanged.
    fn resolve_references(&self, path: &Path, contract: Contract) -> Contract {
        let mut stack = self
            .resolution_stack
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        stack.clear();
        stack.push(path.to_path_buf());

        // TODO: merge `$ref` targets into `definitions` and detect cycles via the stack.
        let sections = [
            &contract.definitions,
            &contract.input_state,
            &contract.output_state,
        ];
        if sections.into_iter().flatten().any(has_ref) {
            tracing::debug!(path = %path.display(), "Contract has unresolved $ref entries");
        }
        contract
    }

    /// Drop every cached document and contract.
    pub fn clear_cache(&self) {
        self.documents.clear();
        self.contracts.clear();
        tracing::debug!("Contract caches cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            parses: self.parses.load(Ordering::Relaxed),
            document_hits: self.document_hits.load(Ordering::Relaxed),
            contract_hits: self.contract_hits.load(Ordering::Relaxed),
            cached_documents: self.documents.len(),
            cached_contracts: self.contracts.len(),
        }
    }
}

impl Default for ContractStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn stat(path: &Path) -> Result<(PathBuf, FileStamp)> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KernelError::ContractValidation {
                path: path.display().to_string(),
                message: "contract file does not exist".into(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(KernelError::ContractValidation {
            path: path.display().to_string(),
            message: "contract path is not a file".into(),
        });
    }
    let key = tokio::fs::canonicalize(path).await?;
    Ok((
        key,
        FileStamp {
            modified: meta.modified()?,
            len: meta.len(),
        },
    ))
}

fn has_ref(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            map.contains_key("$ref") || map.values().any(has_ref)
        }
        serde_json::Value::Array(items) => items.iter().any(has_ref),
        _ => false,
    }
}

/// Check required fields on the parsed document, then build the typed contract.
fn build_contract(path: &Path, content: &serde_yaml::Value) -> Result<Contract> {
    let invalid = |message: &str| KernelError::ContractValidation {
        path: path.display().to_string(),
        message: message.to_string(),
    };

    let root = content
        .as_mapping()
        .ok_or_else(|| invalid("contract document must be a mapping"))?;

    let node_name = root.get("node_name").and_then(|v| v.as_str());
    if node_name.map_or(true, |n| n.trim().is_empty()) {
        return Err(invalid("missing required field 'node_name'"));
    }

    let main_tool_class = root
        .get("tool_specification")
        .and_then(|spec| spec.get("main_tool_class"))
        .and_then(|v| v.as_str());
    if main_tool_class.map_or(true, |c| c.trim().is_empty()) {
        return Err(invalid(
            "missing required field 'tool_specification.main_tool_class'",
        ));
    }

    serde_yaml::from_value(content.clone())
        .map_err(|e| invalid(&format!("invalid contract: {e}")))
}
