//! `Monitor` (spec §4.6): a step whose status is driven by the status of
//! other steps it watches rather than by work it performs itself, plus
//! `MonitorStarter`, a small step that waits for a set of monitors to begin
//! running before finishing.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use uuid::Uuid;

use wf_graph::Stage;

use crate::step::{Step, StepBase, StepHandle};

/// A step that derives its own lifecycle from a watched subset of the
/// graph. `on_run` stands in for the source's pattern of subclassing
/// `Monitor` and overriding `run` to do the actual monitoring work; the
/// default does nothing each tick.
pub struct Monitor {
    base: StepBase,
    watches: Mutex<Vec<StepHandle>>,
    watch_all: Mutex<bool>,
    has_been_run_once: Mutex<bool>,
    on_run: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

impl Monitor {
    pub fn new(name: impl Into<String>, watches: Vec<StepHandle>, watch_all: bool) -> Result<Arc<Self>> {
        Self::with_run(name, watches, watch_all, || Ok(()))
    }

    pub fn with_run(
        name: impl Into<String>,
        watches: Vec<StepHandle>,
        watch_all: bool,
        on_run: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        if watch_all && !watches.is_empty() {
            anyhow::bail!("cannot set 'watch_all' and 'watches' options together");
        }
        Ok(Arc::new(Self {
            base: StepBase::new(name),
            watches: Mutex::new(watches),
            watch_all: Mutex::new(watch_all),
            has_been_run_once: Mutex::new(false),
            on_run: Box::new(on_run),
        }))
    }

    pub fn watches(&self) -> Vec<StepHandle> {
        self.watches.lock().unwrap().clone()
    }

    fn mark_validated(&self) {
        self.base.status.set_validated();
        *self.has_been_run_once.lock().unwrap() = false;
    }

    /// Steps reachable through this monitor's own `dependencies`, excluded
    /// from `watch_all` population since they already run in order before
    /// the monitor does.
    fn own_reference_subtree(&self) -> HashSet<Uuid> {
        let mut seen = HashSet::new();
        let mut stack: Vec<StepHandle> = Step::dependencies(self);
        while let Some(step) = stack.pop() {
            if seen.insert(step.id()) {
                stack.extend(step.dependencies());
            }
        }
        seen
    }

    fn populate_watch_all(&self) {
        let mut watches = self.watches.lock().unwrap();
        if !watches.is_empty() {
            return;
        }
        if let Some(executor) = self.executor() {
            tracing::debug!(step = %self.name(), "evaluating watch_all");
            let own_subtree = self.own_reference_subtree();
            let self_id = self.id();
            for step in executor.all_references() {
                if step.id() != self_id
                    && !own_subtree.contains(&step.id())
                    && step.as_any().downcast_ref::<Monitor>().is_none()
                {
                    watches.push(step);
                }
            }
        }
        if watches.is_empty() {
            tracing::debug!(step = %self.name(), "watch_all set but nothing to watch; will run once before exiting");
            drop(watches);
            *self.watch_all.lock().unwrap() = false;
        }
    }

    /// Depth-first search for a `Failed` stage anywhere under `step`,
    /// walking dependencies only while `step` itself is still `Pending`
    /// (once a step leaves `Pending` its own stage already reflects any
    /// upstream failure it would have inherited).
    fn search_tree_for_failures(&self, step: &StepHandle) -> Stage {
        if step.status().pending() {
            for dependency in step.dependencies() {
                let status = self.search_tree_for_failures(&dependency);
                if matches!(status, Stage::Failed(_)) {
                    return status;
                }
            }
        }
        step.status().stage()
    }

    fn watched_steps_status(&self, watches: &[StepHandle]) -> Option<Stage> {
        let mut overall: Option<Stage> = None;
        for step in watches {
            let status = self.search_tree_for_failures(step);
            if matches!(status, Stage::Failed(_)) {
                return Some(status);
            }
            let replace = match &overall {
                None => true,
                Some(Stage::Finished) => true,
                _ => matches!(status, Stage::Running),
            };
            if replace {
                overall = Some(status);
            }
        }
        overall
    }

    fn check_watched_steps(&self) {
        if let Some(executor) = self.executor() {
            if executor.is_aborted() {
                self.base.status.set_finished();
                return;
            }
        }

        if self.base.status.pending() {
            return;
        }

        if *self.watch_all.lock().unwrap() {
            self.populate_watch_all();
        }

        let watches = self.watches.lock().unwrap().clone();
        if watches.is_empty() {
            let already_ran = *self.has_been_run_once.lock().unwrap();
            if already_ran {
                self.base.status.set_finished();
            } else {
                self.mark_validated();
                *self.has_been_run_once.lock().unwrap() = true;
            }
            return;
        }

        match self.watched_steps_status(&watches) {
            Some(Stage::Running) => self.mark_validated(),
            Some(Stage::Failed(_)) | Some(Stage::Finished) => self.base.status.set_finished(),
            Some(Stage::Pending) | Some(Stage::Validated) => self.base.status.set_running(),
            None => {}
        }
    }
}

impl Step for Monitor {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn extra_references(&self, for_execution: bool) -> Vec<(String, StepHandle)> {
        if for_execution {
            Vec::new()
        } else {
            self.watches.lock().unwrap().iter().map(|s| ("watches".to_string(), s.clone())).collect()
        }
    }

    fn validate(&self) -> Result<()> {
        self.mark_validated();
        Ok(())
    }

    fn run(&self) -> Result<()> {
        (self.on_run)()
    }

    fn check_status(&self) -> Result<()> {
        self.check_watched_steps();
        Ok(())
    }
}

/// Waits until every configured monitor has either started running or
/// failed, then finishes; surfaces the first monitor failure as its own.
pub struct MonitorStarter {
    base: StepBase,
    monitors: Vec<StepHandle>,
}

impl MonitorStarter {
    pub fn new(name: impl Into<String>, monitors: Vec<StepHandle>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), monitors })
    }
}

impl Step for MonitorStarter {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn extra_references(&self, _for_execution: bool) -> Vec<(String, StepHandle)> {
        self.monitors.iter().map(|m| ("monitors".to_string(), m.clone())).collect()
    }

    fn run(&self) -> Result<()> {
        let executor = self.executor().ok_or_else(|| anyhow::anyhow!("MonitorStarter must be run through an executor"))?;

        if let Some(failed) = self.monitors.iter().find(|m| executor.is_step_failed(m.id())) {
            let error = match failed.status().stage() {
                Stage::Failed(f) => anyhow::anyhow!("{f}"),
                _ => anyhow::anyhow!("monitor `{}` failed", failed.name()),
            };
            self.base.status.set_failed(error);
            return Ok(());
        }

        let remaining = self
            .monitors
            .iter()
            .any(|m| !executor.is_step_in_working_set(m.id()) && !executor.is_step_finished(m.id()));
        if !remaining {
            self.base.status.set_finished();
        }
        Ok(())
    }
}
