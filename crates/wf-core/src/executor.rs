//! The two-phase (validate-then-run) scheduler (spec §4.5): walks the
//! reference graph bottom-up, maintains a working set, applies a failure
//! policy, and supports interactive recovery through a [`Prompter`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use wf_graph::{reference::reverse_mapping, GraphError, Node, Stage};

use crate::step::{Step, StepHandle};

/// Raised when a step tries to prompt the user after the execution has
/// already been aborted; the prompt is auto-declined rather than shown.
#[derive(Debug, thiserror::Error)]
#[error("executor previously aborted")]
pub struct ExecutorAborted;

/// Failure policy (spec §4.5 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Raise,
    Skip,
    GracefulShutdown,
    Prompt,
}

impl FromStr for OnFailure {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raise" => Ok(Self::Raise),
            "skip" => Ok(Self::Skip),
            "graceful shutdown" | "graceful_shutdown" => Ok(Self::GracefulShutdown),
            "prompt" => Ok(Self::Prompt),
            other => anyhow::bail!("on_failure must be one of raise, skip, prompt, graceful shutdown; got {other:?}"),
        }
    }
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Raise => "raise",
            Self::Skip => "skip",
            Self::GracefulShutdown => "graceful shutdown",
            Self::Prompt => "prompt",
        };
        write!(f, "{s}")
    }
}

/// A user-input channel for the executor's `Prompt` failure policy and for
/// `Step::prompt_user`. Standing in for the source's `user_input_class`
/// parameter (spec.md §9.1 design note).
pub trait Prompter: Send + Sync {
    fn prompt(&self, full_prompt: &str, valid_choices: &[String], default: Option<&str>) -> Result<String>;
}

/// Reads prompts from a [`wf_runtime::Runtime`], re-prompting until the
/// answer is one of `valid_choices` and applying `default` on empty input,
/// matching `UserInput.prompt_user`'s loop.
pub struct ConsolePrompter {
    runtime: Mutex<Box<dyn wf_runtime::Runtime>>,
}

impl ConsolePrompter {
    pub fn new(runtime: Box<dyn wf_runtime::Runtime>) -> Self {
        Self { runtime: Mutex::new(runtime) }
    }
}

impl Prompter for ConsolePrompter {
    fn prompt(&self, full_prompt: &str, valid_choices: &[String], default: Option<&str>) -> Result<String> {
        let mut runtime = self.runtime.lock().unwrap();
        loop {
            let line = runtime.read_line(full_prompt)?;
            let answer = if line.is_empty() { default.map(str::to_string) } else { Some(line.to_lowercase()) };
            match answer {
                Some(a) if valid_choices.is_empty() || valid_choices.contains(&a) => return Ok(a),
                _ => continue,
            }
        }
    }
}

/// A [`Prompter`] for executors that should never need one (e.g. the
/// Instantiator's nested executor, which always runs with `on_failure =
/// Raise`): any prompt attempt is itself a bug and fails loudly rather than
/// silently blocking.
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn prompt(&self, _full_prompt: &str, _valid_choices: &[String], _default: Option<&str>) -> Result<String> {
        anyhow::bail!("this executor has no prompter configured")
    }
}

/// Test-only (but public, like `FakeRuntime`) prompter that replays a fixed
/// queue of canned answers and records every call, so tests can assert a
/// prompt fired an exact number of times (spec §8 scenario 5).
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { answers: Mutex::new(answers.into_iter().map(Into::into).collect()), calls: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&self, full_prompt: &str, _valid_choices: &[String], _default: Option<&str>) -> Result<String> {
        self.calls.lock().unwrap().push(full_prompt.to_string());
        self.answers.lock().unwrap().pop_front().ok_or_else(|| anyhow::anyhow!("no more scripted prompt answers"))
    }
}

/// Per-run bookkeeping the executor mutates as it drains the working set
/// (spec §3 "Execution"). Keyed by `Uuid` rather than by step identity, as
/// is the rest of this crate's graph machinery.
struct ExecutionState {
    working_set: HashMap<Uuid, StepHandle>,
    consumer_map: HashMap<Uuid, Vec<StepHandle>>,
    all_refs: HashMap<Uuid, StepHandle>,
    finished_steps: HashSet<Uuid>,
    failed_steps: HashSet<Uuid>,
    aborted: bool,
    updated: bool,
}

/// Summary of a completed `execute()` call, for CLI/test consumption.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub finished: Vec<String>,
    pub failed: Vec<String>,
    pub aborted: bool,
}

/// The two-phase scheduler itself. Construct with [`Executor::new`] (wraps
/// in an `Arc` since steps hold a weak back-pointer to it) and call
/// [`Executor::execute`].
pub struct Executor {
    pub name: String,
    dependencies: Vec<StepHandle>,
    on_failure: OnFailure,
    scan_interval: Duration,
    dry_run: bool,
    start_aborted: bool,
    prompter: Box<dyn Prompter>,
    execution: Mutex<Option<ExecutionState>>,
}

impl Executor {
    pub fn new(
        name: impl Into<String>,
        dependencies: Vec<StepHandle>,
        on_failure: OnFailure,
        scan_interval: Duration,
        dry_run: bool,
        prompter: Box<dyn Prompter>,
    ) -> Arc<Self> {
        Self::new_raw(name, dependencies, on_failure, scan_interval, dry_run, prompter, false)
    }

    /// Full constructor exposing `start_aborted`, used to exercise the
    /// documented Open Question behavior (spec §9 "GracefulShutdown with
    /// already-aborted execution"): every step is left Pending because the
    /// run phase never polls past the abort check.
    pub fn new_raw(
        name: impl Into<String>,
        dependencies: Vec<StepHandle>,
        on_failure: OnFailure,
        scan_interval: Duration,
        dry_run: bool,
        prompter: Box<dyn Prompter>,
        start_aborted: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            dependencies,
            on_failure,
            scan_interval,
            dry_run,
            start_aborted,
            prompter,
            execution: Mutex::new(None),
        })
    }

    fn build_execution(&self) -> std::result::Result<ExecutionState, GraphError> {
        let mapping = reverse_mapping::<StepHandle>(&self.dependencies, true)?;
        let working_set = mapping.leaves.into_iter().map(|s| (Node::id(&s), s)).collect();
        Ok(ExecutionState {
            working_set,
            consumer_map: mapping.consumers,
            all_refs: mapping.all_refs,
            finished_steps: HashSet::new(),
            failed_steps: HashSet::new(),
            aborted: self.start_aborted,
            updated: false,
        })
    }

    fn attach(self: &Arc<Self>, state: &ExecutionState) {
        let weak = Arc::downgrade(self);
        for step in state.all_refs.values() {
            step.set_executor(weak.clone());
        }
        for step in &self.dependencies {
            step.set_executor(weak.clone());
        }
    }

    /// Runs the validation phase, then (unless aborted or `dry_run`) the
    /// run phase, matching the source `Executor.execute`.
    pub fn execute(self: &Arc<Self>) -> Result<ExecutionReport> {
        let mut state = self.build_execution()?;
        self.attach(&state);

        tracing::info!(executor = %self.name, "validating plan...");
        self.run_validation_phase(&mut state)?;
        let validation_aborted = state.aborted;
        *self.execution.lock().unwrap() = Some(state);

        if validation_aborted {
            tracing::error!(executor = %self.name, "plan failed to validate");
            return Ok(self.report());
        }
        tracing::info!(executor = %self.name, "plan successfully validated");

        if self.dry_run {
            tracing::info!(executor = %self.name, "dry-run: steps are not run");
            return Ok(self.report());
        }

        tracing::info!(executor = %self.name, "beginning execution...");
        let mut run_state = self.build_execution()?;
        self.attach(&run_state);
        let run_result = self.run_run_phase(&mut run_state);
        *self.execution.lock().unwrap() = Some(run_state);
        run_result?;
        Ok(self.report())
    }

    pub fn report(&self) -> ExecutionReport {
        match self.execution.lock().unwrap().as_ref() {
            Some(s) => ExecutionReport {
                finished: s.finished_steps.iter().filter_map(|id| s.all_refs.get(id)).map(|s| s.name().to_string()).collect(),
                failed: s.failed_steps.iter().filter_map(|id| s.all_refs.get(id)).map(|s| s.name().to_string()).collect(),
                aborted: s.aborted,
            },
            None => ExecutionReport::default(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.execution.lock().unwrap().as_ref().map(|s| s.aborted).unwrap_or(false)
    }

    /// Every step reachable from this executor's current execution,
    /// consulted by `Monitor::watch_all`.
    pub fn all_references(&self) -> Vec<StepHandle> {
        self.execution.lock().unwrap().as_ref().map(|s| s.all_refs.values().cloned().collect()).unwrap_or_default()
    }

    pub fn is_step_failed(&self, id: Uuid) -> bool {
        self.execution.lock().unwrap().as_ref().map(|s| s.failed_steps.contains(&id)).unwrap_or(false)
    }

    pub fn is_step_finished(&self, id: Uuid) -> bool {
        self.execution.lock().unwrap().as_ref().map(|s| s.finished_steps.contains(&id)).unwrap_or(false)
    }

    pub fn is_step_in_working_set(&self, id: Uuid) -> bool {
        self.execution.lock().unwrap().as_ref().map(|s| s.working_set.contains_key(&id)).unwrap_or(false)
    }

    /// Sets `aborted`, drops `id` from the working set, and records it
    /// failed. Used by `Step::prompt_user_for_status`'s abort choice.
    pub fn abort_and_drop(&self, id: Uuid) {
        if let Some(state) = self.execution.lock().unwrap().as_mut() {
            state.aborted = true;
            state.working_set.remove(&id);
            state.failed_steps.insert(id);
            state.updated = true;
        }
    }

    pub fn prompt_user_for_step(
        &self,
        _step_id: Uuid,
        _step_name: &str,
        prompt: &str,
        valid_choices: &[String],
        default: Option<&str>,
    ) -> Result<String> {
        if self.is_aborted() {
            anyhow::bail!(ExecutorAborted);
        }
        self.prompter.prompt(prompt, valid_choices, default)
    }

    fn validate_step(&self, step: &StepHandle) -> Result<()> {
        if matches!(step.status().stage(), Stage::Pending) {
            match step.validate() {
                Ok(()) => {
                    if matches!(step.status().stage(), Stage::Pending) {
                        step.status().set_validated();
                    }
                }
                Err(e) => step.status().set_failed(e),
            }
        }
        if step.status().failed() {
            anyhow::bail!("step `{}` failed validation", step.name());
        }
        Ok(())
    }

    fn consider_step_finished(&self, state: &mut ExecutionState, step: &StepHandle) {
        state.finished_steps.insert(step.id());
        state.working_set.remove(&step.id());
        state.updated = true;
    }

    fn consider_step_failed(&self, state: &mut ExecutionState, step: &StepHandle) {
        state.failed_steps.insert(step.id());
        state.working_set.remove(&step.id());
        state.updated = true;
    }

    fn add_consumers_to_working_set(&self, state: &mut ExecutionState, step: &StepHandle) {
        let consumers = state.consumer_map.get(&step.id()).cloned().unwrap_or_default();
        for consumer in consumers {
            let unsatisfied = consumer.references(true).into_iter().any(|(_, r)| !state.finished_steps.contains(&r.id()));
            if !unsatisfied {
                state.working_set.insert(consumer.id(), consumer);
                state.updated = true;
            }
        }
    }

    fn handle_failure(&self, state: &mut ExecutionState, step: &StepHandle) -> Result<()> {
        match self.on_failure {
            OnFailure::Raise => {
                state.aborted = true;
                anyhow::bail!("step `{}` failed: {}", step.name(), display_failure(step));
            }
            OnFailure::GracefulShutdown => {
                state.aborted = true;
                self.consider_step_failed(state, step);
                Ok(())
            }
            OnFailure::Skip => {
                self.consider_step_failed(state, step);
                Ok(())
            }
            OnFailure::Prompt => {
                step.prompt_user_for_status();
                if step.status().finished() {
                    self.consider_step_finished(state, step);
                    if !state.aborted {
                        self.add_consumers_to_working_set(state, step);
                    }
                } else if step.status().failed() {
                    self.consider_step_failed(state, step);
                }
                // else: reverted to Pending/Validated/Running for a retry; leave it
                // in the working set so the next pass re-polls it.
                Ok(())
            }
        }
    }

    fn run_validation_phase(&self, state: &mut ExecutionState) -> Result<()> {
        while !state.working_set.is_empty() {
            state.updated = false;
            let snapshot: Vec<StepHandle> = state.working_set.values().cloned().collect();
            for step in snapshot {
                if !state.aborted {
                    if let Err(e) = self.validate_step(&step) {
                        step.status().set_failed(anyhow::anyhow!("{e}"));
                        self.handle_failure(state, &step)?;
                    }
                }
                if state.working_set.contains_key(&step.id()) {
                    self.consider_step_finished(state, &step);
                    if !state.aborted {
                        self.add_consumers_to_working_set(state, &step);
                    }
                }
            }
            if state.updated {
                tracing::info!(
                    executor = %self.name,
                    finished = state.finished_steps.len(),
                    total = state.all_refs.len(),
                    "validation pass complete"
                );
            }
        }
        Ok(())
    }

    fn process_step_run_phase(&self, state: &mut ExecutionState, step: &StepHandle) -> Result<()> {
        step.status().check(|| step.check_status());
        match step.status().stage() {
            Stage::Running => Ok(()),
            Stage::Finished => {
                self.consider_step_finished(state, step);
                if !state.aborted {
                    self.add_consumers_to_working_set(state, step);
                }
                Ok(())
            }
            Stage::Pending | Stage::Validated => {
                if state.aborted {
                    state.working_set.remove(&step.id());
                    state.updated = true;
                    return Ok(());
                }
                let pending = matches!(step.status().stage(), Stage::Pending);
                let result = if pending { self.validate_step(step) } else { step.run() };
                if let Err(e) = result {
                    step.status().set_failed(anyhow::anyhow!("{e}"));
                    anyhow::bail!("{e}");
                }
                Ok(())
            }
            Stage::Failed(f) => anyhow::bail!("{f}"),
        }
    }

    fn run_run_phase(&self, state: &mut ExecutionState) -> Result<()> {
        while !state.working_set.is_empty() {
            state.updated = false;
            let snapshot: Vec<StepHandle> = state.working_set.values().cloned().collect();
            for step in snapshot {
                if let Err(e) = self.process_step_run_phase(state, &step) {
                    step.status().set_failed(anyhow::anyhow!("{e}"));
                    self.handle_failure(state, &step)?;
                }
            }
            if state.updated {
                tracing::info!(
                    executor = %self.name,
                    finished = state.finished_steps.len(),
                    total = state.all_refs.len(),
                    in_flight = state.working_set.len(),
                    failed = state.failed_steps.len(),
                    "run pass complete"
                );
            }
            if self.scan_interval > Duration::ZERO && !state.working_set.is_empty() {
                tracing::debug!(executor = %self.name, ?self.scan_interval, "sleeping before next pass");
                std::thread::sleep(self.scan_interval);
            }
        }

        if state.aborted {
            tracing::error!(executor = %self.name, "aborted prematurely");
        } else if !state.failed_steps.is_empty() {
            tracing::info!(executor = %self.name, "finished all steps but some had errors that were skipped");
        } else {
            tracing::info!(executor = %self.name, "finished all steps successfully");
        }
        Ok(())
    }
}

fn display_failure(step: &StepHandle) -> String {
    match step.status().stage() {
        Stage::Failed(f) => f.to_string(),
        other => other.to_string(),
    }
}
