//! End-to-end coverage of the concrete scenarios enumerated in spec.md §8,
//! exercised through the real `Executor` rather than unit-testing its
//! internals. Scenarios 3 (cycle) and 7 (anonymous reference naming) are
//! already covered against the `Instantiator` in `instantiator.rs`'s own
//! test module; the rest are covered here because they need a full
//! `Executor::execute()` run to observe.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use wf_core::{Executor, NoPrompter, OnFailure, ScriptedPrompter, Step, StepBase, StepHandle};

/// Unsizes a concrete step into a `StepHandle`; `as StepHandle` doesn't work
/// on `Arc<T>`, and annotating every intermediate binding gets noisy once a
/// graph has more than two or three nodes.
fn sh<S: Step + 'static>(step: Arc<S>) -> StepHandle {
    step
}

/// A step that finishes on its first `run()`, counting how many times it
/// actually ran (used to assert shared dependencies run exactly once).
struct CountingStep {
    base: StepBase,
    run_count: AtomicUsize,
}

impl CountingStep {
    fn new(name: &str, deps: Vec<StepHandle>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::with_dependencies(name, deps), run_count: AtomicUsize::new(0) })
    }
}

impl Step for CountingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn run(&self) -> Result<()> {
        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.base.status.set_finished();
        Ok(())
    }
}

/// A step whose `run()` always fails, for the skip-policy and prompt
/// scenarios.
struct FailingStep {
    base: StepBase,
    message: String,
}

impl FailingStep {
    fn new(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), message: message.to_string() })
    }
}

impl Step for FailingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn run(&self) -> Result<()> {
        anyhow::bail!("{}", self.message)
    }
}

/// A step whose `run()` fails exactly once, then succeeds on a later call
/// (scenario 5: prompt retry). Guarded by whether `run()` has been called
/// before, not by an iteration count, since the retry path re-enters `run`.
struct FlakyOnceStep {
    base: StepBase,
    has_failed_once: Mutex<bool>,
}

impl FlakyOnceStep {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), has_failed_once: Mutex::new(false) })
    }
}

impl Step for FlakyOnceStep {
    fn base(&self) -> &StepBase {
        &self.base
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn run(&self) -> Result<()> {
        let mut failed = self.has_failed_once.lock().unwrap();
        if !*failed {
            *failed = true;
            anyhow::bail!("transient failure");
        }
        self.base.status.set_finished();
        Ok(())
    }
}

/// Shares a `ScriptedPrompter` between the executor (which needs to own a
/// `Box<dyn Prompter>`) and the test (which needs to read `call_count`
/// afterwards).
struct SharedPrompter(Arc<ScriptedPrompter>);

impl wf_core::Prompter for SharedPrompter {
    fn prompt(&self, full_prompt: &str, valid_choices: &[String], default: Option<&str>) -> Result<String> {
        self.0.prompt(full_prompt, valid_choices, default)
    }
}

fn quiet_executor(name: &str, deps: Vec<StepHandle>, on_failure: OnFailure) -> Arc<Executor> {
    Executor::new(name, deps, on_failure, Duration::ZERO, false, Box::new(NoPrompter))
}

fn prompting_executor(name: &str, deps: Vec<StepHandle>, prompter: Arc<ScriptedPrompter>) -> Arc<Executor> {
    Executor::new(name, deps, OnFailure::Prompt, Duration::ZERO, false, Box::new(SharedPrompter(prompter)))
}

/// Scenario 1: single leaf runs.
#[test]
fn single_leaf_runs() {
    let a = CountingStep::new("a", vec![]);
    let executor = quiet_executor("root", vec![sh(a.clone())], OnFailure::Raise);
    let report = executor.execute().unwrap();

    assert!(a.status().finished());
    assert!(report.failed.is_empty());
    assert!(!report.aborted);
}

/// Scenario 2: diamond with a shared dependency. `A` must be visited
/// exactly once even though both `B` and `C` depend on it, and `D` must
/// finish only after both `B` and `C` do.
#[test]
fn diamond_with_shared_dependency_runs_shared_dep_once() {
    let a = CountingStep::new("a", vec![]);
    let b = CountingStep::new("b", vec![sh(a.clone())]);
    let c = CountingStep::new("c", vec![sh(a.clone())]);
    let d = CountingStep::new("d", vec![sh(b.clone()), sh(c.clone())]);

    let executor = quiet_executor("root", vec![sh(d.clone())], OnFailure::Raise);
    let report = executor.execute().unwrap();

    assert_eq!(a.run_count.load(Ordering::SeqCst), 1);
    assert!(d.status().finished());
    assert!(report.failed.is_empty());
}

/// Scenario 4: skip policy. Two siblings of a parent fail; the parent never
/// reaches readiness (never promoted to finished) because two of its
/// dependencies failed, but a sibling branch that doesn't depend on the
/// failures still finishes, and the execution as a whole does not abort.
#[test]
fn skip_policy_leaves_failed_branch_unfinished_but_does_not_abort() {
    let f1 = FailingStep::new("f1", "f1 exploded");
    let f2 = FailingStep::new("f2", "f2 exploded");
    let s = CountingStep::new("s", vec![]);
    let p = CountingStep::new("p", vec![sh(f1.clone()), sh(f2.clone()), sh(s.clone())]);
    let p2 = CountingStep::new("p2", vec![sh(s.clone())]);

    let executor = quiet_executor("root", vec![sh(p.clone()), sh(p2.clone())], OnFailure::Skip);
    let report = executor.execute().unwrap();

    assert!(f1.status().failed());
    assert!(f2.status().failed());
    assert!(s.status().finished());
    assert!(!p.status().finished(), "p must never be promoted: two of its dependencies failed");
    assert!(p2.status().finished());
    assert!(!report.aborted);
    assert!(!executor.is_aborted());
}

/// Scenario 5: prompt retry. A step whose `run()` fails the first time it
/// is invoked is driven with `on_failure = Prompt`; the user answers `r`
/// (retry). The step's own retried `run()` succeeds, so the step ends
/// Finished and the prompt is consulted exactly once.
#[test]
fn prompt_retry_reruns_a_flaky_step_until_it_succeeds() {
    let flaky = FlakyOnceStep::new("flaky");
    let prompter = Arc::new(ScriptedPrompter::new(["r"]));
    let executor = prompting_executor("root", vec![sh(flaky.clone())], prompter.clone());

    let report = executor.execute().unwrap();

    assert!(flaky.status().finished());
    assert_eq!(prompter.call_count(), 1);
    assert!(report.failed.is_empty());
}

/// The `(f)` branch of `prompt_user_for_status`: a step whose recovery
/// prompt always says "mark finished" ends up Finished without ever
/// rerunning.
#[test]
fn prompt_mark_finished_finishes_a_failing_step_without_rerunning() {
    let failing = FailingStep::new("stuck", "needs a human");
    let prompter = Arc::new(ScriptedPrompter::new(["f"]));
    let executor = prompting_executor("root", vec![sh(failing.clone())], prompter.clone());

    let report = executor.execute().unwrap();

    assert!(failing.status().finished());
    assert_eq!(prompter.call_count(), 1);
    assert!(report.failed.is_empty());
}

/// The `(a)` branch: a step whose recovery prompt always says "abort"
/// marks the execution aborted and the step ends up failed.
#[test]
fn prompt_abort_marks_execution_aborted() {
    let failing = FailingStep::new("stuck", "needs a human");
    let prompter = Arc::new(ScriptedPrompter::new(["a"]));
    let executor = prompting_executor("root", vec![sh(failing.clone())], prompter.clone());

    let report = executor.execute().unwrap();

    assert!(failing.status().failed());
    assert!(report.aborted);
    assert_eq!(report.failed, vec!["stuck".to_string()]);
}

/// `GracefulShutdown` marks the execution aborted on the first failure;
/// whatever remains pending in that same working set is dropped without
/// being run, but the failure itself is always recorded.
#[test]
fn graceful_shutdown_aborts_and_records_the_failure() {
    let failing = FailingStep::new("f1", "boom");
    let never_run = CountingStep::new("never", vec![]);
    let executor = quiet_executor("root", vec![sh(failing.clone()), sh(never_run.clone())], OnFailure::GracefulShutdown);

    let report = executor.execute().unwrap();

    assert!(failing.status().failed());
    assert!(report.aborted);
    assert!(report.failed.contains(&"f1".to_string()));
}

/// `Raise` policy: the first failure re-raises out of `execute()` and
/// marks the execution aborted.
#[test]
fn raise_policy_propagates_the_failure() {
    let failing = FailingStep::new("boom", "kaboom");
    let executor = quiet_executor("root", vec![sh(failing.clone())], OnFailure::Raise);

    let err = executor.execute().unwrap_err();
    assert!(err.to_string().contains("kaboom"));
    assert!(executor.is_aborted());
}

/// Empty workflow: an executor with no dependencies completes immediately
/// with nothing finished and no error (spec §8 boundary condition).
#[test]
fn empty_workflow_completes_immediately() {
    let executor = quiet_executor("root", vec![], OnFailure::Raise);
    let report = executor.execute().unwrap();
    assert!(report.finished.is_empty());
    assert!(report.failed.is_empty());
    assert!(!report.aborted);
}
