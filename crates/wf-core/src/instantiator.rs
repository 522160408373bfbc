//! The Instantiator (spec §4.7, C7): a step that materializes a workflow
//! graph from a `step-name -> step-config` mapping, wiring references
//! (including anonymous inline subgraphs) before running a nested
//! `Executor` over one `InstantiationStep` per entry. Grounded in
//! `original_source/daisy/instantiator.py`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::class_registry::{ClassRegistry, ResolvedReference, StepClass};
use crate::executor::{Executor, NoPrompter, OnFailure};
use crate::step::{Step, StepBase, StepHandle};

/// Suffix appended to a synthesized anonymous-reference step name, verbatim
/// from the source's `ANONYMOUS_SUFFIX`.
pub const ANONYMOUS_SUFFIX: &str = "reference";

/// A reference-typed config value after the anonymous-lifting pass: either
/// the name of another (possibly freshly synthesized) step, or a list of
/// names for a `ReferenceList` attribute.
#[derive(Debug, Clone)]
enum RefName {
    Single(String),
    List(Vec<String>),
}

/// One entry of the Instantiator's input mapping, turned into a step in its
/// own right so the nested `Executor` can order construction by reference
/// dependency. Grounded in the source's `InstantiationStep`.
pub struct InstantiationStep {
    base: StepBase,
    step_class: Arc<StepClass>,
    /// Remaining plain (non-reference, non-`class`, non-`dependencies`)
    /// config keys, handed to `step_class.construct` verbatim.
    fields: Mutex<Map<String, Value>>,
    /// Reference-field values, resolved to step *names* during linking and
    /// to actual `StepHandle`s only at `run()` time (once the nested
    /// executor guarantees the referenced step was already constructed).
    reference_names: Mutex<HashMap<String, RefName>>,
    explicit_dependencies: Vec<String>,
    references_linked: AtomicBool,
    shared_steps: Arc<Mutex<HashMap<String, StepHandle>>>,
}

impl InstantiationStep {
    fn new(
        name: String,
        mut cfg: Map<String, Value>,
        registry: &ClassRegistry,
        namespaces: &[String],
        shared_steps: Arc<Mutex<HashMap<String, StepHandle>>>,
    ) -> Result<Arc<Self>> {
        let class_path = cfg
            .remove(crate::config::CLASS_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| anyhow!("step {name:?} does not specify a `class`"))?;
        let step_class = registry
            .find_class(&class_path, namespaces)
            .map_err(|e| anyhow!("step {name:?}: could not find the class {class_path:?}: {e}"))?;

        let explicit_dependencies = match cfg.remove(crate::config::DEPENDENCIES_KEY) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| anyhow!("`dependencies` entries must be step names")))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => anyhow::bail!("step {name:?}: `dependencies` must be a list of step names, got {other}"),
        };

        Ok(Arc::new(Self {
            base: StepBase::new(name),
            step_class,
            fields: Mutex::new(cfg),
            reference_names: Mutex::new(HashMap::new()),
            explicit_dependencies,
            references_linked: AtomicBool::new(false),
            shared_steps,
        }))
    }
}

impl Step for InstantiationStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        let raw_fields = self.fields.lock().unwrap().clone();
        let fields = wf_graph::validate_fields(self.step_class.fields, &raw_fields)
            .map_err(|e| anyhow!("step {:?}: {e}", self.name()))?;
        let shared = self.shared_steps.lock().unwrap();
        let mut resolved = HashMap::new();
        for (attr, refname) in self.reference_names.lock().unwrap().iter() {
            let lookup = |n: &str| -> Result<StepHandle> {
                shared
                    .get(n)
                    .cloned()
                    .ok_or_else(|| anyhow!("step {:?} references {n:?} through {attr:?} but it was not constructed", self.name()))
            };
            let resolved_value = match refname {
                RefName::Single(n) => ResolvedReference::Single(lookup(n)?),
                RefName::List(names) => ResolvedReference::List(names.iter().map(|n| lookup(n)).collect::<Result<Vec<_>>>()?),
            };
            resolved.insert(attr.clone(), resolved_value);
        }
        drop(shared);

        tracing::debug!(step = %self.name(), class = %self.step_class.path, "instantiating");
        let built = (self.step_class.construct)(fields, resolved)
            .map_err(|e| anyhow!("failed to construct step {:?} as `{}`: {e}", self.name(), self.step_class.path))?;
        self.shared_steps.lock().unwrap().insert(self.name().to_string(), built);
        self.base.status.set_finished();
        Ok(())
    }
}

/// Recursively pops this step's declared reference fields out of its
/// config, lifting any inline (anonymous) step configs into freshly
/// constructed `InstantiationStep`s first, then wires the resulting
/// dependency edges through the ordinary `Step::dependencies` machinery so
/// the nested executor's own cycle detection (spec §4.3) covers the
/// Instantiator's graph too. Idempotent per step (`references_linked`
/// guards against being re-run when a later top-level entry also reaches
/// this one through the worklist).
fn link_references(
    name: &str,
    all: &mut HashMap<String, Arc<InstantiationStep>>,
    registry: &ClassRegistry,
    namespaces: &[String],
    shared_steps: &Arc<Mutex<HashMap<String, StepHandle>>>,
) -> Result<()> {
    let istep = all.get(name).expect("instantiation step must already be registered").clone();
    if istep.references_linked.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    for spec in istep.step_class.reference_fields {
        let raw = istep.fields.lock().unwrap().remove(spec.name);
        let Some(raw) = raw else {
            if spec.optional {
                continue;
            }
            anyhow::bail!("step {name:?} does not specify its required reference `{}`", spec.name);
        };

        if spec.list {
            let Value::Array(elements) = raw else {
                anyhow::bail!("step {name:?}: `{}` is supposed to be a list of references", spec.name);
            };
            let mut names = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
                let element_name = resolve_one_reference(
                    name,
                    spec.name,
                    Some(index),
                    element,
                    all,
                    registry,
                    namespaces,
                    shared_steps,
                )?;
                names.push(element_name);
            }
            istep.reference_names.lock().unwrap().insert(spec.name.to_string(), RefName::List(names));
        } else {
            let element_name = resolve_one_reference(name, spec.name, None, raw, all, registry, namespaces, shared_steps)?;
            istep.reference_names.lock().unwrap().insert(spec.name.to_string(), RefName::Single(element_name));
        }
    }

    for dep_name in &istep.explicit_dependencies {
        let dep = all
            .get(dep_name)
            .ok_or_else(|| anyhow!("step {name:?} depends on {dep_name:?} but it doesn't exist"))?
            .clone();
        let dep_handle: StepHandle = dep;
        istep.add_dependency(dep_handle);
    }

    Ok(())
}

/// Resolves one reference element (scalar, or one entry of a reference
/// list): if it's a step name, links the dependency edge directly; if it's
/// an inline mapping, synthesizes a name, builds+links a new
/// `InstantiationStep` for it first, then links the edge to that.
#[allow(clippy::too_many_arguments)]
fn resolve_one_reference(
    owner: &str,
    attr: &str,
    index: Option<usize>,
    element: Value,
    all: &mut HashMap<String, Arc<InstantiationStep>>,
    registry: &ClassRegistry,
    namespaces: &[String],
    shared_steps: &Arc<Mutex<HashMap<String, StepHandle>>>,
) -> Result<String> {
    let element_name = match element {
        Value::String(s) => s,
        Value::Object(inline_cfg) => {
            let synthesized = match index {
                Some(i) => format!("{owner}.{attr}.{i}.{ANONYMOUS_SUFFIX}"),
                None => format!("{owner}.{attr}.{ANONYMOUS_SUFFIX}"),
            };
            if all.contains_key(&synthesized) {
                anyhow::bail!(
                    "when naming an anonymous reference for {owner:?}.{attr}, a step named {synthesized:?} already exists; rename that step"
                );
            }
            let child = InstantiationStep::new(synthesized.clone(), inline_cfg, registry, namespaces, shared_steps.clone())?;
            all.insert(synthesized.clone(), child);
            link_references(&synthesized, all, registry, namespaces, shared_steps)?;
            synthesized
        }
        other => anyhow::bail!("step {owner:?}.{attr} must be a step name or an inline step config, got {other}"),
    };

    let dep = all
        .get(&element_name)
        .ok_or_else(|| anyhow!("step {owner:?} references {element_name:?} through `{attr}` but {element_name:?} doesn't exist"))?
        .clone();
    let owner_handle = all.get(owner).expect("owner must already be registered").clone();
    let dep_handle: StepHandle = dep;
    owner_handle.add_dependency(dep_handle);
    Ok(element_name)
}

/// The step that drives the whole C7 algorithm: builds one
/// `InstantiationStep` per entry of `config`, links their reference
/// dependencies (lifting anonymous inline configs along the way), runs them
/// through a nested `Executor`, and exposes the resulting concrete steps in
/// [`Instantiator::steps`].
pub struct Instantiator {
    base: StepBase,
    config: Map<String, Value>,
    namespaces: Vec<String>,
    registry: Arc<ClassRegistry>,
    pub steps: Mutex<HashMap<String, StepHandle>>,
}

impl Instantiator {
    pub fn new(name: impl Into<String>, config: Map<String, Value>, namespaces: Vec<String>, registry: Arc<ClassRegistry>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), config, namespaces, registry, steps: Mutex::new(HashMap::new()) })
    }

    fn build_instantiation_steps(&self, shared_steps: Arc<Mutex<HashMap<String, StepHandle>>>) -> Result<HashMap<String, Arc<InstantiationStep>>> {
        let mut all = HashMap::new();
        for (name, raw_cfg) in &self.config {
            let cfg = raw_cfg
                .as_object()
                .cloned()
                .ok_or_else(|| anyhow!("step {name:?}'s config must be a mapping"))?;
            let istep = InstantiationStep::new(name.clone(), cfg, &self.registry, &self.namespaces, shared_steps.clone())?;
            all.insert(name.clone(), istep);
        }

        let top_level_names: Vec<String> = all.keys().cloned().collect();
        for name in top_level_names {
            link_references(&name, &mut all, &self.registry, &self.namespaces, &shared_steps)?;
        }
        Ok(all)
    }
}

impl Step for Instantiator {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        tracing::debug!(step = %self.name(), "creating instantiation steps");
        let shared_steps: Arc<Mutex<HashMap<String, StepHandle>>> = Arc::new(Mutex::new(HashMap::new()));
        let instantiation_steps = self.build_instantiation_steps(shared_steps.clone())?;

        tracing::debug!(step = %self.name(), "running instantiation tree");
        let dependencies: Vec<StepHandle> = instantiation_steps.into_values().map(|s| s as StepHandle).collect();
        let nested_executor = Executor::new(self.name(), dependencies, OnFailure::Raise, Duration::ZERO, false, Box::new(NoPrompter));
        nested_executor.execute()?;

        *self.steps.lock().unwrap() = shared_steps.lock().unwrap().clone();
        self.base.status.set_finished();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_registry::StepClass;
    use crate::step::StepBase;
    use wf_graph::ReferenceFieldSpec;

    struct RecordingStep {
        base: StepBase,
        seen: Mutex<String>,
    }

    impl Step for RecordingStep {
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

    fn leaf_class() -> StepClass {
        StepClass {
            path: "test.Leaf".to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(|_fields, _refs| {
                Ok(Arc::new(RecordingStep { base: StepBase::new("leaf"), seen: Mutex::new(String::new()) }) as StepHandle)
            }),
        }
    }

    const OWNER_REFS: &[ReferenceFieldSpec] =
        &[ReferenceFieldSpec { name: "child", list: false, optional: false, affects_execution_order: true }];

    fn owner_class() -> StepClass {
        StepClass {
            path: "test.Owner".to_string(),
            reference_fields: OWNER_REFS,
            fields: &[],
            construct: Box::new(|_fields, refs| {
                let child = match refs.get("child") {
                    Some(ResolvedReference::Single(s)) => s.name().to_string(),
                    _ => panic!("expected a resolved `child` reference"),
                };
                Ok(Arc::new(RecordingStep { base: StepBase::new("owner"), seen: Mutex::new(child) }) as StepHandle)
            }),
        }
    }

    fn registry() -> Arc<ClassRegistry> {
        let mut r = ClassRegistry::new();
        r.register(leaf_class());
        r.register(owner_class());
        Arc::new(r)
    }

    #[test]
    fn wires_named_reference() {
        let config: Map<String, Value> = serde_json::json!({
            "leaf": {"class": "test.Leaf"},
            "owner": {"class": "test.Owner", "child": "leaf"},
        })
        .as_object()
        .unwrap()
        .clone();

        let instantiator = Instantiator::new("inst", config, vec![], registry());
        instantiator.run().unwrap();
        let steps = instantiator.steps.lock().unwrap();
        assert!(steps.contains_key("leaf"));
        assert!(steps.contains_key("owner"));
    }

    #[test]
    fn lifts_anonymous_inline_reference() {
        let config: Map<String, Value> = serde_json::json!({
            "owner": {"class": "test.Owner", "child": {"class": "test.Leaf"}},
        })
        .as_object()
        .unwrap()
        .clone();

        let instantiator = Instantiator::new("inst", config, vec![], registry());
        instantiator.run().unwrap();
        let steps = instantiator.steps.lock().unwrap();
        assert!(steps.contains_key("owner.child.reference"));
    }

    #[test]
    fn dangling_reference_name_is_fatal() {
        let config: Map<String, Value> = serde_json::json!({
            "owner": {"class": "test.Owner", "child": "does_not_exist"},
        })
        .as_object()
        .unwrap()
        .clone();

        let instantiator = Instantiator::new("inst", config, vec![], registry());
        let err = instantiator.run().unwrap_err();
        assert!(err.to_string().contains("does_not_exist"));
    }

    #[test]
    fn missing_class_key_is_fatal() {
        let config: Map<String, Value> = serde_json::json!({ "owner": {} }).as_object().unwrap().clone();
        let instantiator = Instantiator::new("inst", config, vec![], registry());
        let err = instantiator.run().unwrap_err();
        assert!(err.to_string().contains("class"));
    }

    #[test]
    fn cyclic_reference_is_detected() {
        let config: Map<String, Value> = serde_json::json!({
            "a": {"class": "test.Owner", "child": "b"},
            "b": {"class": "test.Owner", "child": "a"},
        })
        .as_object()
        .unwrap()
        .clone();

        let instantiator = Instantiator::new("inst", config, vec![], registry());
        let err = instantiator.run().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('a') && msg.contains('b'));
    }
}
