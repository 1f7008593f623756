use serde::{Deserialize, Serialize};

/// The six lifecycle phases, declared in execution order.
///
/// `Ord` follows declaration order, so sorted collections keyed by `Phase`
/// iterate in the order the runner executes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    Before,
    Execute,
    After,
    Emit,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Preflight,
        Phase::Before,
        Phase::Execute,
        Phase::After,
        Phase::Emit,
        Phase::Finalize,
    ];

    /// Whether the first hook failure aborts the phase and skips the rest of
    /// the run (up to `finalize`).
    pub fn default_fail_fast(&self) -> bool {
        matches!(self, Phase::Preflight | Phase::Before | Phase::Execute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::Before => "before",
            Phase::Execute => "execute",
            Phase::After => "after",
            Phase::Emit => "emit",
            Phase::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
