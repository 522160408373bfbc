//! Scenario 6 (spec.md §8): a `Monitor` with `watch_all = true` attached to
//! a real `Executor`, exercised end-to-end rather than by calling
//! `check_watched_steps` directly (the `watch_all` lazy-population path
//! only has an executor to ask once it's actually attached).

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use wf_core::{Executor, Monitor, NoPrompter, OnFailure, Step, StepBase, StepHandle};

fn sh<S: Step + 'static>(step: Arc<S>) -> StepHandle {
    step
}

struct LeafStep {
    base: StepBase,
}

impl LeafStep {
    fn new(name: &str, deps: Vec<StepHandle>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::with_dependencies(name, deps) })
    }
}

impl Step for LeafStep {
    fn base(&self) -> &StepBase {
        &self.base
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn run(&self) -> Result<()> {
        self.base.status.set_finished();
        Ok(())
    }
}

/// A step that spends at least one full pass in `Running` before
/// finishing, so a watching monitor actually observes `Stage::Running`
/// (a synchronous leaf never does -- it goes straight from `Validated` to
/// `Finished` in one `run()` call).
struct SlowStep {
    base: StepBase,
    polls: AtomicUsize,
}

impl SlowStep {
    fn new(name: &str, deps: Vec<StepHandle>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::with_dependencies(name, deps), polls: AtomicUsize::new(0) })
    }
}

impl Step for SlowStep {
    fn base(&self) -> &StepBase {
        &self.base
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn run(&self) -> Result<()> {
        self.base.status.set_running();
        Ok(())
    }
    fn check_status(&self) -> Result<()> {
        if self.base.status.running() && self.polls.fetch_add(1, Ordering::SeqCst) >= 1 {
            self.base.status.set_finished();
        }
        Ok(())
    }
}

/// `Executor` contains `{A, B<-A, C<-B, M}` where `M.watch_all = true`.
/// After execution, `M.watches` should equal `{A, B, C}`, `M` ends
/// Finished, and its `run()` was invoked at least once (`C` spends a pass
/// genuinely `Running`, which is what drives the monitor back to
/// `Validated` so the executor calls its `run()` again).
#[test]
fn watch_all_monitor_discovers_every_other_step_and_finishes_clean() {
    let a = LeafStep::new("a", vec![]);
    let b = LeafStep::new("b", vec![sh(a.clone())]);
    let c = SlowStep::new("c", vec![sh(b.clone())]);

    let run_count = Arc::new(AtomicUsize::new(0));
    let counter = run_count.clone();
    let m = Monitor::with_run("m", vec![], true, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    let executor = Executor::new(
        "root",
        vec![sh(c.clone()), sh(m.clone())],
        OnFailure::Raise,
        Duration::ZERO,
        false,
        Box::new(NoPrompter),
    );
    let report = executor.execute().unwrap();

    let watched_names: std::collections::HashSet<String> = m.watches().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(watched_names, ["a", "b", "c"].into_iter().map(str::to_string).collect());
    assert!(m.status().finished());
    assert!(run_count.load(Ordering::SeqCst) >= 1);
    assert!(report.failed.is_empty());
    assert!(!report.aborted);
}

/// If a watched step's subtree fails, the monitor exits cleanly
/// (Finished) alongside it rather than itself failing.
#[test]
fn monitor_finishes_cleanly_when_a_watched_dependency_fails() {
    struct AlwaysFails {
        base: StepBase,
    }
    impl Step for AlwaysFails {
        fn base(&self) -> &StepBase {
            &self.base
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn run(&self) -> Result<()> {
            anyhow::bail!("boom")
        }
    }
    let failing: StepHandle = Arc::new(AlwaysFails { base: StepBase::new("failing") });
    let watcher_target = LeafStep::new("watched", vec![]);
    watcher_target.add_dependency(failing.clone());

    let m = Monitor::new("m", vec![sh(watcher_target.clone())], false).unwrap();

    let executor = Executor::new(
        "root",
        vec![failing.clone(), sh(m.clone())],
        OnFailure::Skip,
        Duration::ZERO,
        false,
        Box::new(NoPrompter),
    );
    let report = executor.execute().unwrap();

    assert!(m.status().finished());
    assert!(report.failed.contains(&"failing".to_string()));
}
