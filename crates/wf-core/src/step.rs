//! The base `Step` contract (spec §4.4): every unit of work in the engine
//! implements this trait. A step carries a [`Status`] state machine, an
//! implicit `dependencies` reference-list, and a back-pointer to the
//! `Executor` it is attached to (set on attach, read by prompts and by
//! `Monitor::watch_all`).

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use uuid::Uuid;

use wf_graph::{CircularReferenceError, ExceedsMaximumDepthError, GraphError, Stage, Status, MAXIMUM_REFERENCE_DEPTH};

use crate::executor::Executor;

/// Fixed multi-choice recovery prompt offered by `prompt_user_for_status`,
/// verbatim from the source's `Step.STATUS_PROMPT`.
pub const STATUS_PROMPT: &str =
    "What would you like to do? (a)bort the plan, mark the step as (f)inished (any step that requires output from this step may have issues), or (r)etry?";

/// Shared handle to any step in the graph. Steps are always referenced
/// through this `Arc<dyn Step>` alias rather than by pointer identity, since
/// node identity for the reference graph is the step's `Uuid` (spec §3,
/// "Rust-specific realization choices").
pub type StepHandle = Arc<dyn Step>;

/// Fields every concrete step type embeds verbatim, mirroring the common
/// state the source's `Step.__init__` sets up (`status`, `executor`,
/// `dependencies`) without requiring each step to reimplement it.
pub struct StepBase {
    id: Uuid,
    name: String,
    pub status: Status,
    dependencies: Mutex<Vec<StepHandle>>,
    executor: Mutex<Option<Weak<Executor>>>,
}

impl StepBase {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            status: Status::new(name.clone()),
            name,
            dependencies: Mutex::new(Vec::new()),
            executor: Mutex::new(None),
        }
    }

    pub fn with_dependencies(name: impl Into<String>, dependencies: Vec<StepHandle>) -> Self {
        let base = Self::new(name);
        *base.dependencies.lock().unwrap() = dependencies;
        base
    }
}

/// Every step's lifecycle contract. Default methods read/write through
/// [`StepBase`] so concrete steps only need to supply `base()` plus
/// whatever of `run`/`validate`/`check_status`/`extra_references`/`output`
/// they actually customize.
pub trait Step: Send + Sync + Any {
    fn base(&self) -> &StepBase;

    fn as_any(&self) -> &dyn Any;

    /// Declared reference attributes beyond the implicit `dependencies`
    /// list, already filtered by `for_execution` the way the source's
    /// `get_references` filters on `affects_execution_order`. Most steps
    /// have none; `Output`/`Pipe` report their `input_step`, `Monitor`
    /// reports `watches` only when `!for_execution`.
    fn extra_references(&self, _for_execution: bool) -> Vec<(String, StepHandle)> {
        Vec::new()
    }

    /// Verify preconditions. Default: mark validated immediately, matching
    /// the source's default `Step.validate`.
    fn validate(&self) -> Result<()> {
        self.base().status.set_validated();
        Ok(())
    }

    /// Begin or perform the step's work.
    fn run(&self) -> Result<()>;

    /// Step-specific status-check callback, invoked by `Status::check`
    /// between executor passes. Default: no-op (a plain synchronous step
    /// that finishes inside `run` never needs this).
    fn check_status(&self) -> Result<()> {
        Ok(())
    }

    /// Present once a step has finished, for steps in the `Input` family.
    /// Modeled as a default method rather than a separate `Input` trait so
    /// any step can be referenced generically as `StepHandle` without
    /// trait-object upcasting; non-input steps simply never override it.
    fn output(&self) -> Option<String> {
        None
    }

    fn id(&self) -> Uuid {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn status(&self) -> &Status {
        &self.base().status
    }

    fn dependencies(&self) -> Vec<StepHandle> {
        self.base().dependencies.lock().unwrap().clone()
    }

    fn add_dependency(&self, dep: StepHandle) {
        self.base().dependencies.lock().unwrap().push(dep);
    }

    fn retain_dependencies(&self, keep: impl Fn(&StepHandle) -> bool) {
        self.base().dependencies.lock().unwrap().retain(keep);
    }

    fn set_executor(&self, executor: Weak<Executor>) {
        *self.base().executor.lock().unwrap() = Some(executor);
    }

    fn executor(&self) -> Option<Arc<Executor>> {
        self.base().executor.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    /// Every directly-referenced step: `dependencies` (always order-
    /// affecting) plus `extra_references`, tagged with the attribute name
    /// they came through.
    fn references(&self, for_execution: bool) -> Vec<(String, StepHandle)> {
        let mut refs: Vec<(String, StepHandle)> =
            self.dependencies().into_iter().map(|d| ("dependencies".to_string(), d)).collect();
        refs.extend(self.extra_references(for_execution));
        refs
    }

    /// Delegates to the attached executor's interactive-recovery prompt.
    /// Errors if no executor is attached, matching the source's
    /// `RuntimeError("Cannot prompt the user for input if not run through
    /// an executor")`.
    fn prompt_user(&self, prompt: &str, valid_choices: &[String], default: Option<&str>) -> Result<String> {
        let executor = self
            .executor()
            .ok_or_else(|| anyhow::anyhow!("cannot prompt the user for input if not run through an executor"))?;
        executor.prompt_user_for_step(self.id(), self.name(), prompt, valid_choices, default)
    }

    /// Interactive recovery: abort / mark-finished / retry (spec §4.4).
    /// Called by the executor's `Prompt` failure policy. Any error from
    /// the prompt path itself aborts the execution with the underlying
    /// error, matching the source's outer `except Exception` clause.
    fn prompt_user_for_status(&self) {
        let Some(executor) = self.executor() else {
            self.status().set_failed(anyhow::anyhow!(
                "cannot prompt the user for input if not run through an executor"
            ));
            return;
        };

        let exception_line = match self.status().stage() {
            Stage::Failed(f) => Some(format!("Exception: {f}")),
            _ => None,
        };
        let notification = format!("Need user input for {:?}", self.name());
        let prompt = [Some(notification), exception_line, Some(STATUS_PROMPT.to_string())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n");

        let choices = ["a".to_string(), "f".to_string(), "r".to_string()];
        match self.prompt_user(&prompt, &choices, None) {
            Ok(choice) if choice == "r" => {
                let reverted = match self.status().stage() {
                    Stage::Failed(f) => f.previous_stage,
                    _ => None,
                };
                match reverted {
                    Some(previous) => self.status().revert_to(previous),
                    None => self.status().set_pending(),
                }
            }
            Ok(choice) if choice == "f" => self.status().set_finished(),
            Ok(_) => {
                if !self.status().failed() {
                    self.status().set_failed(anyhow::anyhow!("execution aborted due to step choice"));
                }
                executor.abort_and_drop(self.id());
            }
            Err(e) => {
                self.status().set_failed(anyhow::anyhow!("could not get user input, aborting plan: {e}"));
                executor.abort_and_drop(self.id());
            }
        }
    }
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} {:?}>", self.name(), self.status().stage())
    }
}

impl wf_graph::Node for StepHandle {
    fn id(&self) -> Uuid {
        Step::id(self.as_ref())
    }

    fn label(&self) -> String {
        Step::name(self.as_ref()).to_string()
    }

    fn edges(&self, for_execution: bool) -> Vec<(String, Self)> {
        self.as_ref().references(for_execution)
    }
}

/// Recurses through `step.dependencies()` only (not `extra_references`),
/// computing the set of dependencies reachable through each direct
/// dependency and subtracting it from `step`'s own list -- removing
/// redundant direct edges to ancestors already reachable through a child.
/// Mirrors the source's `Step.prune`, including its cycle/depth-bound
/// machinery (spec §4.3, §8 "`prune` is idempotent").
pub fn prune(step: &StepHandle) -> std::result::Result<(), GraphError> {
    let mut cache: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    let mut parents: Vec<Uuid> = Vec::new();
    prune_walk(step, &mut cache, &mut parents)?;
    Ok(())
}

fn prune_walk(
    step: &StepHandle,
    cache: &mut HashMap<Uuid, HashSet<Uuid>>,
    parents: &mut Vec<Uuid>,
) -> std::result::Result<HashSet<Uuid>, GraphError> {
    let id = Step::id(step.as_ref());
    if let Some(cached) = cache.get(&id) {
        return Ok(cached.clone());
    }

    let deps = step.dependencies();
    if deps.is_empty() {
        cache.insert(id, HashSet::new());
        return Ok(HashSet::new());
    }

    if parents.len() > MAXIMUM_REFERENCE_DEPTH {
        return Err(GraphError::TooDeep(ExceedsMaximumDepthError));
    }

    parents.push(id);
    let mut sub_dependencies: HashSet<Uuid> = HashSet::new();
    let dep_ids: HashSet<Uuid> = deps.iter().map(|d| Step::id(d.as_ref())).collect();

    for dep in &deps {
        let dep_id = Step::id(dep.as_ref());
        if parents.contains(&dep_id) {
            parents.pop();
            return Err(GraphError::Circular(CircularReferenceError::new(dep.name())));
        }

        match prune_walk(dep, cache, parents) {
            Ok(set) => sub_dependencies.extend(set),
            Err(GraphError::Circular(mut e)) => {
                let is_root = e.root_label() == step.name();
                e.add_reference(step.name(), is_root, vec!["dependencies".to_string()]);
                parents.pop();
                return Err(GraphError::Circular(e));
            }
            Err(other) => {
                parents.pop();
                return Err(other);
            }
        }
    }
    parents.pop();

    step.retain_dependencies(|d| !sub_dependencies.contains(&Step::id(d.as_ref())));

    let mut all: HashSet<Uuid> = sub_dependencies;
    all.extend(dep_ids);
    cache.insert(id, all.clone());
    Ok(all)
}
