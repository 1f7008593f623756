//! Security screening of raw contract text, run before any structural parse.
//!
//! Two hazards are hard failures: oversized documents and excessive bracket
//! nesting. Suspicious textual markers are reported but never block a load.

use keel_types::{KernelError, Result};

/// Default maximum document size: 10 MiB.
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Default maximum bracket nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Markers associated with unsafe deserialization or code execution.
pub const SUSPICIOUS_MARKERS: &[&str] = &[
    "!!python/",
    "!!ruby/",
    "!!java",
    "!!js/",
    "__import__",
    "eval(",
    "exec(",
    "os.system",
    "subprocess",
    "<script",
];

/// Limits applied by [`screen`].
#[derive(Debug, Clone)]
pub struct ScreeningLimits {
    /// Maximum document size in bytes (default: 10 MiB).
    pub max_bytes: usize,
    /// Maximum bracket nesting depth (default: 50).
    pub max_depth: usize,
}

impl Default for ScreeningLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ScreeningLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum document size.
    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Set maximum bracket nesting depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// What screening observed about a document that passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenReport {
    pub size: usize,
    pub max_depth: usize,
    pub suspicious: Vec<&'static str>,
}

/// Deepest bracket nesting over the raw character stream.
///
/// `{` and `[` increment, `}` and `]` decrement (never below zero). Brackets
/// inside quoted strings or comments are counted too; this is a cheap bound on
/// pathological documents, not a measure of parse depth.
pub fn bracket_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    for b in text.bytes() {
        match b {
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Markers from [`SUSPICIOUS_MARKERS`] present in `text`.
pub fn suspicious_markers(text: &str) -> Vec<&'static str> {
    SUSPICIOUS_MARKERS
        .iter()
        .copied()
        .filter(|marker| text.contains(marker))
        .collect()
}

/// Screen raw contract text. `path` is used for error messages and logs only.
pub fn screen(path: &str, text: &str, limits: &ScreeningLimits) -> Result<ScreenReport> {
    if text.len() > limits.max_bytes {
        return Err(KernelError::ContractTooLarge {
            path: path.to_string(),
            size: text.len(),
            limit: limits.max_bytes,
        });
    }

    let depth = bracket_depth(text);
    if depth > limits.max_depth {
        return Err(KernelError::NestingTooDeep {
            path: path.to_string(),
            depth,
            limit: limits.max_depth,
        });
    }

    let suspicious = suspicious_markers(text);
    for marker in &suspicious {
        tracing::warn!(path = %path, marker = %marker, "Suspicious marker in contract");
    }

    Ok(ScreenReport {
        size: text.len(),
        max_depth: depth,
        suspicious,
    })
}
