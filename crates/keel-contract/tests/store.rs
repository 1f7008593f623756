//! Integration tests for the contract store: caching, invalidation, and
//! screening limits against real files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use keel_contract::{ContractStore, NodeType, ScreeningLimits};
use keel_types::KernelError;

const BASE: &str = "node_name: text_filter\n\
node_type: COMPUTE\n\
contract_version: { major: 1, minor: 0, patch: 0 }\n\
tool_specification:\n  main_tool_class: NodeTextFilter\n";

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write contract");
    path
}

fn bump_mtime(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(120))
        .unwrap();
}

/// Pad `BASE` with a trailing comment so the document is exactly `len` bytes.
fn padded(len: usize) -> String {
    let mut body = String::from(BASE);
    body.push_str("# ");
    let fill = len - body.len() - 1;
    body.push_str(&"x".repeat(fill));
    body.push('\n');
    assert_eq!(body.len(), len);
    body
}

#[tokio::test]
async fn repeated_load_parses_once_and_returns_same_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "contract.yaml", BASE);
    let store = ContractStore::new();

    let first = store.load(&path).await.unwrap();
    let second = store.load(&path).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    let stats = store.stats();
    assert_eq!(stats.parses, 1);
    assert_eq!(stats.contract_hits, 1);
    assert_eq!(first.node_name, "text_filter");
    assert_eq!(first.node_type, NodeType::Compute);
}

#[tokio::test]
async fn advancing_mtime_forces_reparse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "contract.yaml", BASE);
    let store = ContractStore::new();

    let first = store.load(&path).await.unwrap();
    assert_eq!(first.tool_specification.main_tool_class, "NodeTextFilter");

    std::fs::write(&path, BASE.replace("NodeTextFilter", "NodeTextFilterV2")).unwrap();
    bump_mtime(&path);

    let second = store.load(&path).await.unwrap();
    assert_eq!(second.tool_specification.main_tool_class, "NodeTextFilterV2");
    assert_eq!(store.stats().parses, 2);

    // The replaced entry is now the cached one.
    let third = store.load(&path).await.unwrap();
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(store.stats().parses, 2);
}

#[tokio::test]
async fn document_tier_records_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "contract.yaml", BASE);
    let store = ContractStore::new();

    let doc = store.load_document(&path).await.unwrap();
    assert_eq!(doc.file_size, BASE.len() as u64);
    assert_eq!(doc.content_hash.len(), 64);
    assert_eq!(doc.content["node_name"].as_str(), Some("text_filter"));

    // The contract load reuses the cached document.
    store.load(&path).await.unwrap();
    let stats = store.stats();
    assert_eq!(stats.parses, 1);
    assert_eq!(stats.document_hits, 1);
}

#[tokio::test]
async fn clear_cache_forces_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "contract.yaml", BASE);
    let store = ContractStore::new();

    store.load(&path).await.unwrap();
    store.clear_cache();
    assert_eq!(store.stats().cached_contracts, 0);
    store.load(&path).await.unwrap();
    assert_eq!(store.stats().parses, 2);
}

#[tokio::test]
async fn missing_file_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ContractStore::new()
        .load(dir.path().join("absent.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::ContractValidation { .. }));
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn malformed_yaml_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "bad.yaml", "node_name: [unterminated\n");
    let err = ContractStore::new().load(&path).await.unwrap_err();
    assert!(matches!(err, KernelError::ContractValidation { .. }));
    assert!(err.to_string().contains("malformed"));
}

#[tokio::test]
async fn missing_main_tool_class_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "c.yaml", "node_name: x\ntool_specification: {}\n");
    let err = ContractStore::new().load(&path).await.unwrap_err();
    assert!(err.to_string().contains("main_tool_class"));
}

#[tokio::test]
async fn exactly_ten_mib_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "big.yaml", &padded(10 * 1024 * 1024));
    let contract = ContractStore::new().load(&path).await.unwrap();
    assert_eq!(contract.node_name, "text_filter");
}

#[tokio::test]
async fn one_byte_over_ten_mib_is_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "big.yaml", &padded(10 * 1024 * 1024 + 1));
    let err = ContractStore::new().load(&path).await.unwrap_err();
    assert!(matches!(err, KernelError::ContractTooLarge { .. }));
    assert!(err.to_string().contains("too large"));
}

fn with_nesting(depth: usize) -> String {
    format!(
        "{BASE}definitions:\n  deep: {}{}\n",
        "[".repeat(depth),
        "]".repeat(depth)
    )
}

#[tokio::test]
async fn nesting_of_fifty_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "nested.yaml", &with_nesting(50));
    let contract = ContractStore::new().load(&path).await.unwrap();
    assert!(contract.definitions.is_some());
}

#[tokio::test]
async fn nesting_of_fifty_one_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "nested.yaml", &with_nesting(51));
    let err = ContractStore::new().load(&path).await.unwrap_err();
    assert!(matches!(err, KernelError::NestingTooDeep { depth: 51, .. }));
}

#[tokio::test]
async fn custom_limits_apply() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "c.yaml", BASE);
    let store = ContractStore::with_limits(ScreeningLimits::new().with_max_bytes(10));
    let err = store.load(&path).await.unwrap_err();
    assert!(matches!(err, KernelError::ContractTooLarge { limit: 10, .. }));
}

#[tokio::test]
async fn concurrent_first_loads_parse_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "contract.yaml", BASE);
    let store = Arc::new(ContractStore::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move { store.load(&path).await.unwrap() }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(store.stats().parses, 1);
}
