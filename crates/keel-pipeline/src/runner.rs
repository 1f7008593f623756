//! The phase-ordered hook runner.
//!
//! Core loop:
//! 1. Walk the six phases in canonical order.
//! 2. Run each phase's hooks sequentially, in registration order.
//! 3. In a fail-fast phase, the first failure stops the phase, is remembered,
//!    and every later phase except `finalize` is skipped.
//! 4. In a continue phase, every failure is captured as a [`HookError`].
//! 5. `finalize` always runs exactly once; afterwards a remembered fail-fast
//!    error is returned to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError};

use keel_types::{Context, KernelError, Result};

use crate::callable::{CallableRegistry, HookBody};
use crate::events::{EventEmitter, RunnerEvent};
use crate::phase::Phase;
use crate::plan::{ExecutionPlan, Hook};

/// Hook id recorded for failures that cannot be attributed to a single hook.
pub const FRAMEWORK_HOOK_ID: &str = "__framework__";

/// A failure captured by a continue-on-error phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookError {
    pub phase: Phase,
    pub hook_id: String,
    pub error_type: String,
    pub error_message: String,
}

impl HookError {
    fn from_error(phase: Phase, hook_id: &str, err: &KernelError) -> Self {
        Self {
            phase,
            hook_id: hook_id.to_string(),
            error_type: err.error_type().to_string(),
            error_message: err.to_string(),
        }
    }
}

/// Outcome of a run that did not hit a fail-fast error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// `true` iff `errors` is empty.
    pub success: bool,
    pub errors: Vec<HookError>,
    /// Final context snapshot.
    pub context: HashMap<String, serde_json::Value>,
    /// Hook ids in the order they were invoked.
    pub executed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on blocking hook bodies running on the blocking pool at once.
    pub max_blocking_hooks: usize,
}

impl RunnerConfig {
    pub fn with_max_blocking_hooks(mut self, n: usize) -> Self {
        self.max_blocking_hooks = n.max(1);
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_blocking_hooks: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineRunner
// ---------------------------------------------------------------------------

/// Executes an [`ExecutionPlan`] against a [`CallableRegistry`].
///
/// The plan and registry are shared read-only. `run` takes `&mut self`, so a
/// runner cannot drive two runs at once; build one runner per concurrent run.
#[derive(Debug)]
pub struct PipelineRunner {
    plan: Arc<ExecutionPlan>,
    registry: Arc<CallableRegistry>,
    blocking_slots: Arc<Semaphore>,
    events: Option<EventEmitter>,
}

/// Bookkeeping for one `run` invocation.
struct RunState {
    context: Context,
    errors: Vec<HookError>,
    executed: Vec<String>,
}

impl PipelineRunner {
    /// Build a runner, failing if the plan is invalid or any `callable_ref`
    /// in it is missing from the registry.
    pub fn new(plan: Arc<ExecutionPlan>, registry: Arc<CallableRegistry>) -> Result<Self> {
        Self::with_config(plan, registry, RunnerConfig::default())
    }

    pub fn with_config(
        plan: Arc<ExecutionPlan>,
        registry: Arc<CallableRegistry>,
        config: RunnerConfig,
    ) -> Result<Self> {
        plan.validate()?;
        let missing: Vec<String> = plan
            .callable_refs()
            .into_iter()
            .filter(|r| !registry.has(r))
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(KernelError::UnknownCallables { missing });
        }
        Ok(Self::unchecked(plan, registry, config))
    }

    fn unchecked(
        plan: Arc<ExecutionPlan>,
        registry: Arc<CallableRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            plan,
            registry,
            blocking_slots: Arc::new(Semaphore::new(config.max_blocking_hooks.max(1))),
            events: None,
        }
    }

    /// Publish [`RunnerEvent`]s to `events` during runs.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Run with a fresh, empty context.
    pub async fn run(&mut self) -> Result<PipelineResult> {
        self.run_with(Context::new()).await
    }

    /// Run with a caller-seeded context.
    ///
    /// Returns `Err` with the original error when a fail-fast phase failed;
    /// `finalize` has already run by then.
    pub async fn run_with(&mut self, context: Context) -> Result<PipelineResult> {
        let started = Instant::now();
        let mut state = RunState {
            context,
            errors: Vec::new(),
            executed: Vec::new(),
        };
        let mut pending: Option<KernelError> = None;

        self.emit(RunnerEvent::RunStarted {
            hook_count: self.plan.hook_count(),
        });

        for phase in Phase::ALL {
            if phase == Phase::Finalize {
                break;
            }
            if pending.is_some() {
                tracing::debug!(phase = %phase, "Skipping phase after fail-fast error");
                self.emit(RunnerEvent::PhaseSkipped { phase });
                continue;
            }
            match self.run_phase(phase, &mut state).await {
                Ok(()) => {}
                Err(err) if self.plan.fail_fast(phase) => pending = Some(err),
                Err(err) => Self::record_framework_error(phase, err, &mut state),
            }
        }

        if let Err(err) = self.run_phase(Phase::Finalize, &mut state).await {
            Self::record_framework_error(Phase::Finalize, err, &mut state);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(err) = pending {
            tracing::info!(
                duration_ms,
                finalize_errors = state.errors.len(),
                "Pipeline aborted by fail-fast phase"
            );
            return Err(err);
        }

        let success = state.errors.is_empty();
        self.emit(RunnerEvent::RunCompleted {
            success,
            error_count: state.errors.len(),
            duration_ms,
        });
        tracing::info!(success, errors = state.errors.len(), duration_ms, "Pipeline completed");

        Ok(PipelineResult {
            success,
            errors: state.errors,
            context: state.context.snapshot().await,
            executed: state.executed,
        })
    }

    /// Run every hook of `phase`.
    ///
    /// For fail-fast phases the first error is returned. For continue phases
    /// every error goes into `state.errors` and the remaining hooks still run.
    async fn run_phase(&self, phase: Phase, state: &mut RunState) -> Result<()> {
        let fail_fast = self.plan.fail_fast(phase);
        let hooks = self.plan.hooks(phase);
        self.emit(RunnerEvent::PhaseStarted { phase });
        let mut failures = 0;

        for hook in hooks {
            let Some(body) = self.registry.get(&hook.callable_ref).cloned() else {
                let err = KernelError::UnknownCallables {
                    missing: vec![hook.callable_ref.clone()],
                };
                if fail_fast {
                    self.emit(RunnerEvent::PhaseCompleted { phase, failures: failures + 1 });
                    return Err(err);
                }
                failures += 1;
                Self::record_framework_error(phase, err, state);
                continue;
            };

            state.executed.push(hook.hook_id.clone());
            self.emit(RunnerEvent::HookStarted {
                phase,
                hook_id: hook.hook_id.clone(),
            });
            let hook_started = Instant::now();

            match self.invoke(hook, body, &state.context).await {
                Ok(()) => {
                    self.emit(RunnerEvent::HookCompleted {
                        phase,
                        hook_id: hook.hook_id.clone(),
                        duration_ms: hook_started.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => {
                    failures += 1;
                    self.report_failure(phase, &hook.hook_id, &err);
                    if fail_fast {
                        self.emit(RunnerEvent::RunAborted {
                            phase,
                            hook_id: hook.hook_id.clone(),
                            error: err.to_string(),
                        });
                        self.emit(RunnerEvent::PhaseCompleted { phase, failures });
                        return Err(err);
                    }
                    state
                        .errors
                        .push(HookError::from_error(phase, &hook.hook_id, &err));
                }
            }
        }

        self.emit(RunnerEvent::PhaseCompleted { phase, failures });
        Ok(())
    }

    /// Dispatch one hook body as a task and await it, bounded by the hook's
    /// deadline when one is configured.
    ///
    /// For blocking bodies the deadline also covers the wait for a pool slot.
    async fn invoke(&self, hook: &Hook, body: HookBody, context: &Context) -> Result<()> {
        let limit = hook.timeout()?;
        let ctx = context.clone();
        match body {
            HookBody::Async(f) => {
                let handle = tokio::spawn(f(ctx));
                let abort = handle.abort_handle();
                let joined = async move { handle.await.unwrap_or_else(|e| Err(join_failure(e))) };
                Self::bounded(hook, limit, joined, Some(abort)).await
            }
            HookBody::Blocking(f) => {
                let slots = self.blocking_slots.clone();
                let joined = async move {
                    let permit = slots
                        .acquire_owned()
                        .await
                        .map_err(|e| KernelError::Other(format!("blocking pool closed: {e}")))?;
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        f(&ctx)
                    })
                    .await
                    .unwrap_or_else(|e| Err(join_failure(e)))
                };
                // Blocking bodies cannot be pre-empted; a timed-out body is
                // detached and keeps its pool slot until it returns.
                Self::bounded(hook, limit, joined, None).await
            }
        }
    }

    async fn bounded<F>(
        hook: &Hook,
        limit: Option<Duration>,
        work: F,
        abort: Option<AbortHandle>,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let Some(limit) = limit else {
            return work.await;
        };
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                Err(KernelError::HookTimeout {
                    hook_id: hook.hook_id.clone(),
                    timeout_ms: millis(limit),
                })
            }
        }
    }

    fn record_framework_error(phase: Phase, err: KernelError, state: &mut RunState) {
        tracing::error!(phase = %phase, error = %err, "Framework error during phase");
        state
            .errors
            .push(HookError::from_error(phase, FRAMEWORK_HOOK_ID, &err));
    }

    fn report_failure(&self, phase: Phase, hook_id: &str, err: &KernelError) {
        if let KernelError::HookTimeout { timeout_ms, .. } = err {
            tracing::warn!(phase = %phase, hook_id, timeout_ms, "Hook timed out");
            self.emit(RunnerEvent::HookTimedOut {
                phase,
                hook_id: hook_id.to_string(),
                timeout_ms: *timeout_ms,
            });
        } else {
            tracing::warn!(
                phase = %phase,
                hook_id,
                error_type = err.error_type(),
                error = %err,
                "Hook failed"
            );
            self.emit(RunnerEvent::HookFailed {
                phase,
                hook_id: hook_id.to_string(),
                error_type: err.error_type().to_string(),
                error: err.to_string(),
            });
        }
    }

    fn emit(&self, event: RunnerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

fn join_failure(err: JoinError) -> KernelError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "hook panicked".to_string());
        KernelError::hook("Panic", message)
    } else {
        KernelError::hook("Cancelled", "hook task was cancelled")
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_registry(refs: &[&str]) -> CallableRegistry {
        let mut reg = CallableRegistry::new();
        for r in refs {
            reg.register(*r, HookBody::blocking(|_| Ok(())));
        }
        reg
    }

    #[test]
    fn construction_lists_missing_refs_sorted() {
        let plan = ExecutionPlan::builder()
            .hook(Phase::Emit, Hook::new("e", "zz.missing"))
            .hook(Phase::Before, Hook::new("b", "aa.missing"))
            .hook(Phase::After, Hook::new("a", "present"))
            .build()
            .unwrap();
        let err = PipelineRunner::new(Arc::new(plan), Arc::new(noop_registry(&["present"])))
            .unwrap_err();
        match err {
            KernelError::UnknownCallables { missing } => {
                assert_eq!(missing, vec!["aa.missing", "zz.missing"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn framework_failure_in_finalize_uses_sentinel_id() {
        let plan = ExecutionPlan::builder()
            .hook(Phase::Finalize, Hook::new("cleanup", "gone"))
            .build()
            .unwrap();
        // Bypass wiring validation to simulate a registry that lost an entry.
        let mut runner = PipelineRunner::unchecked(
            Arc::new(plan),
            Arc::new(CallableRegistry::new()),
            RunnerConfig::default(),
        );
        let result = runner.run().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].hook_id, FRAMEWORK_HOOK_ID);
        assert_eq!(result.errors[0].phase, Phase::Finalize);
        assert_eq!(result.errors[0].error_type, "UnknownCallables");
    }

    #[tokio::test]
    async fn missing_callable_in_continue_phase_does_not_stop_later_hooks() {
        let plan = ExecutionPlan::builder()
            .hook(Phase::Finalize, Hook::new("lost", "gone"))
            .hook(Phase::Finalize, Hook::new("release", "release"))
            .build()
            .unwrap();
        let mut runner = PipelineRunner::unchecked(
            Arc::new(plan),
            Arc::new(noop_registry(&["release"])),
            RunnerConfig::default(),
        );
        let result = runner.run().await.unwrap();
        assert_eq!(result.executed, vec!["release"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].hook_id, FRAMEWORK_HOOK_ID);
    }

    #[tokio::test]
    async fn panicking_hook_is_captured() {
        let plan = ExecutionPlan::builder()
            .hook(Phase::Emit, Hook::new("boom", "boom"))
            .build()
            .unwrap();
        let mut reg = CallableRegistry::new();
        reg.register("boom", HookBody::blocking(|_| panic!("kaboom")));
        let mut runner = PipelineRunner::new(Arc::new(plan), Arc::new(reg)).unwrap();

        let result = runner.run().await.unwrap();
        assert_eq!(result.errors[0].error_type, "Panic");
        assert_eq!(result.errors[0].error_message, "kaboom");
    }

    #[tokio::test]
    async fn run_with_seeds_context() {
        let plan = ExecutionPlan::builder()
            .hook(Phase::Execute, Hook::new("double", "double"))
            .build()
            .unwrap();
        let mut reg = CallableRegistry::new();
        reg.register(
            "double",
            HookBody::from_async(|ctx: Context| async move {
                let n = ctx.get("n").await.and_then(|v| v.as_i64()).unwrap_or(0);
                ctx.set("n", serde_json::json!(n * 2)).await;
                Ok(())
            }),
        );
        let mut runner = PipelineRunner::new(Arc::new(plan), Arc::new(reg)).unwrap();

        let seeded = Context::from_values(HashMap::from([("n".to_string(), serde_json::json!(21))]));
        let result = runner.run_with(seeded).await.unwrap();
        assert_eq!(result.context["n"], serde_json::json!(42));
    }

    #[test]
    fn config_clamps_blocking_slots() {
        let cfg = RunnerConfig::default().with_max_blocking_hooks(0);
        assert_eq!(cfg.max_blocking_hooks, 1);
    }
}
