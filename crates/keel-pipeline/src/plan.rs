//! Execution plans: which hooks run in which phase.
//!
//! A plan is built once (programmatically or from YAML), validated, and then
//! shared read-only behind an `Arc` by every runner that executes it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use keel_types::{KernelError, Result};

use crate::phase::Phase;

/// A unit of work bound to a phase through a callable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub hook_id: String,
    pub callable_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl Hook {
    pub fn new(hook_id: impl Into<String>, callable_ref: impl Into<String>) -> Self {
        Self {
            hook_id: hook_id.into(),
            callable_ref: callable_ref.into(),
            timeout_seconds: None,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Deadline for the hook, if one is configured.
    ///
    /// Fails with `InvalidPlan` for zero, negative, NaN, or out-of-range values.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        let Some(secs) = self.timeout_seconds else {
            return Ok(None);
        };
        let invalid = |reason: String| {
            KernelError::InvalidPlan(format!(
                "hook '{}' has invalid timeout_seconds {secs}: {reason}",
                self.hook_id
            ))
        };
        if secs.is_nan() || secs <= 0.0 {
            return Err(invalid("must be positive".into()));
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Overrides [`Phase::default_fail_fast`] when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub hooks: Vec<Hook>,
}

/// Immutable phase-keyed collection of hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    phases: BTreeMap<Phase, PhasePlan>,
}

impl ExecutionPlan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    /// Parse and validate a plan document:
    ///
    /// ```yaml
    /// phases:
    ///   before:
    ///     hooks:
    ///       - { hook_id: auth, callable_ref: security.check, timeout_seconds: 2.5 }
    /// ```
    pub fn from_yaml(text: &str) -> Result<Self> {
        let plan: ExecutionPlan = serde_yaml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Hooks registered for `phase`, in registration order.
    pub fn hooks(&self, phase: Phase) -> &[Hook] {
        self.phases
            .get(&phase)
            .map(|p| p.hooks.as_slice())
            .unwrap_or(&[])
    }

    /// Effective fail-fast policy for `phase`. `finalize` never fails fast.
    pub fn fail_fast(&self, phase: Phase) -> bool {
        if phase == Phase::Finalize {
            return false;
        }
        self.phases
            .get(&phase)
            .and_then(|p| p.fail_fast)
            .unwrap_or_else(|| phase.default_fail_fast())
    }

    /// Every distinct callable reference, sorted.
    pub fn callable_refs(&self) -> BTreeSet<&str> {
        self.phases
            .values()
            .flat_map(|p| p.hooks.iter())
            .map(|h| h.callable_ref.as_str())
            .collect()
    }

    pub fn hook_count(&self) -> usize {
        self.phases.values().map(|p| p.hooks.len()).sum()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (phase, plan) in &self.phases {
            if *phase == Phase::Finalize && plan.fail_fast == Some(true) {
                return Err(KernelError::InvalidPlan(
                    "finalize cannot be fail-fast".into(),
                ));
            }
            for hook in &plan.hooks {
                if hook.hook_id.trim().is_empty() {
                    return Err(KernelError::InvalidPlan(format!(
                        "hook in phase '{phase}' has an empty hook_id"
                    )));
                }
                if hook.callable_ref.trim().is_empty() {
                    return Err(KernelError::InvalidPlan(format!(
                        "hook '{}' has an empty callable_ref",
                        hook.hook_id
                    )));
                }
                if !seen.insert(hook.hook_id.as_str()) {
                    return Err(KernelError::InvalidPlan(format!(
                        "duplicate hook_id '{}'",
                        hook.hook_id
                    )));
                }
                hook.timeout()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PlanBuilder {
    phases: BTreeMap<Phase, PhasePlan>,
}

impl PlanBuilder {
    /// Append a hook to `phase`. Phases may be populated in any order.
    pub fn hook(mut self, phase: Phase, hook: Hook) -> Self {
        self.phases.entry(phase).or_default().hooks.push(hook);
        self
    }

    pub fn fail_fast(mut self, phase: Phase, fail_fast: bool) -> Self {
        self.phases.entry(phase).or_default().fail_fast = Some(fail_fast);
        self
    }

    pub fn build(self) -> Result<ExecutionPlan> {
        let plan = ExecutionPlan {
            phases: self.phases,
        };
        plan.validate()?;
        Ok(plan)
    }
}
