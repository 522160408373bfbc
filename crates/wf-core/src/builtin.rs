//! Populates a [`ClassRegistry`] and [`CompilerRegistry`] with every
//! concrete leaf step and compiler stage this crate ships, under the
//! dotted paths a configuration document's `class` key addresses.
//! Grounded in `original_source/daisychain/steps/__init__.py`'s module
//! layout, mirrored here as paths under `wf_core.steps.*`.
//!
//! `ThreadedStep` is deliberately not registered here: it wraps an
//! arbitrary Rust closure, which a JSON config has no way to name, so it's
//! a building block for other (native) step types rather than something a
//! configuration document can address directly by class path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};

use wf_graph::{FieldSpec, ReferenceFieldSpec};
use wf_runtime::Runtime;

use crate::class_registry::{ClassRegistry, ResolvedReference, StepClass};
use crate::compilers::{CompilerRegistry, NamespaceCompiler, SeparateDependencyTree};
use crate::monitor::{Monitor, MonitorStarter};
use crate::step::StepHandle;
use crate::steps::{ConsoleInput, FileInput, FileOutput, InMemoryInput, Manual, RunCommand, StdinInput, TemplatePipe, Wait};

/// By the time `construct` runs, `wf_graph::validate_fields` has already
/// rejected unknown keys and filled in declared defaults against this
/// class's [`FieldSpec`] table, so these helpers only need to pull a
/// present, well-typed value back out.
fn string_field(fields: &Map<String, Value>, key: &str) -> anyhow::Result<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string).ok_or_else(|| anyhow::anyhow!("missing required field `{key}`"))
}

fn optional_string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list_field(fields: &Map<String, Value>, key: &str) -> anyhow::Result<Vec<String>> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| anyhow::anyhow!("`{key}` entries must be strings")))
            .collect(),
        Some(other) => anyhow::bail!("`{key}` must be a list of strings, got {other}"),
    }
}

fn single_reference(refs: &HashMap<String, ResolvedReference>, key: &str) -> anyhow::Result<StepHandle> {
    match refs.get(key) {
        Some(ResolvedReference::Single(s)) => Ok(s.clone()),
        Some(ResolvedReference::List(_)) => anyhow::bail!("`{key}` is a list reference, a single step was expected"),
        None => anyhow::bail!("missing required reference `{key}`"),
    }
}

fn list_reference(refs: &HashMap<String, ResolvedReference>, key: &str) -> Vec<StepHandle> {
    match refs.get(key) {
        Some(ResolvedReference::List(v)) => v.clone(),
        _ => Vec::new(),
    }
}

fn is_string(v: &Value) -> Result<(), String> {
    if v.is_string() {
        Ok(())
    } else {
        Err("must be a string".to_string())
    }
}

fn is_nullable_string(v: &Value) -> Result<(), String> {
    if v.is_null() || v.is_string() {
        Ok(())
    } else {
        Err("must be a string".to_string())
    }
}

fn is_string_list(v: &Value) -> Result<(), String> {
    match v {
        Value::Null => Ok(()),
        Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
        _ => Err("must be a list of strings".to_string()),
    }
}

fn is_bool(v: &Value) -> Result<(), String> {
    if v.is_boolean() {
        Ok(())
    } else {
        Err("must be a boolean".to_string())
    }
}

fn is_u64(v: &Value) -> Result<(), String> {
    if v.is_u64() {
        Ok(())
    } else {
        Err("must be a non-negative integer".to_string())
    }
}

fn is_number(v: &Value) -> Result<(), String> {
    if v.is_number() {
        Ok(())
    } else {
        Err("must be a number".to_string())
    }
}

const INPUT_STEP_REF: &[ReferenceFieldSpec] = &[ReferenceFieldSpec { name: "input_step", list: false, optional: false, affects_execution_order: true }];
const MONITOR_REFS: &[ReferenceFieldSpec] = &[ReferenceFieldSpec { name: "watches", list: true, optional: true, affects_execution_order: false }];
const MONITOR_STARTER_REFS: &[ReferenceFieldSpec] = &[ReferenceFieldSpec { name: "monitors", list: true, optional: false, affects_execution_order: false }];

const IN_MEMORY_INPUT_FIELDS: &[FieldSpec] = &[FieldSpec::required("content").validated(is_string)];
const FILE_INPUT_FIELDS: &[FieldSpec] = &[FieldSpec::required("path").validated(is_string)];
const CONSOLE_INPUT_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("prompt").validated(is_string),
    FieldSpec::optional("valid_choices", || Value::Null).validated(is_string_list),
    FieldSpec::optional("default", || Value::Null).validated(is_nullable_string),
];
const FILE_OUTPUT_FIELDS: &[FieldSpec] = &[FieldSpec::required("path").validated(is_string)];
const TEMPLATE_PIPE_FIELDS: &[FieldSpec] = &[FieldSpec::required("template").validated(is_string)];
const RUN_COMMAND_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("program").validated(is_string),
    FieldSpec::optional("args", || Value::Array(Vec::new())).validated(is_string_list),
    FieldSpec::optional("cwd", || Value::Null).validated(is_nullable_string),
    FieldSpec::optional("poll_interval_ms", || Value::from(250u64)).validated(is_u64),
];
const WAIT_FIELDS: &[FieldSpec] = &[FieldSpec::optional("seconds", || Value::from(0.0)).validated(is_number)];
const MANUAL_FIELDS: &[FieldSpec] = &[FieldSpec::required("message").validated(is_string)];
const MONITOR_FIELDS: &[FieldSpec] = &[FieldSpec::optional("watch_all", || Value::Bool(false)).validated(is_bool)];

/// Registers every builtin step class under `wf_core.steps.*`.
pub fn register_builtin_steps(registry: &mut ClassRegistry, runtime: Arc<Mutex<dyn Runtime>>) {
    registry.register(StepClass {
        path: "wf_core.steps.input.InMemoryInput".to_string(),
        reference_fields: &[],
        fields: IN_MEMORY_INPUT_FIELDS,
        construct: Box::new(|fields, _refs| {
            let content = string_field(&fields, "content")?;
            Ok(InMemoryInput::new("in_memory_input", content) as StepHandle)
        }),
    });

    registry.register({
        let runtime = runtime.clone();
        StepClass {
            path: "wf_core.steps.input.FileInput".to_string(),
            reference_fields: &[],
            fields: FILE_INPUT_FIELDS,
            construct: Box::new(move |fields, _refs| {
                let path = string_field(&fields, "path")?;
                Ok(FileInput::new("file_input", path, runtime.clone()) as StepHandle)
            }),
        }
    });

    registry.register({
        let runtime = runtime.clone();
        StepClass {
            path: "wf_core.steps.input.StdinInput".to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(move |_fields, _refs| Ok(StdinInput::new("stdin_input", runtime.clone()) as StepHandle)),
        }
    });

    registry.register(StepClass {
        path: "wf_core.steps.user_input.ConsoleInput".to_string(),
        reference_fields: &[],
        fields: CONSOLE_INPUT_FIELDS,
        construct: Box::new(|fields, _refs| {
            let prompt = string_field(&fields, "prompt")?;
            let choices = match fields.get("valid_choices") {
                Some(Value::Null) | None => None,
                Some(_) => Some(string_list_field(&fields, "valid_choices")?),
            };
            let default = optional_string_field(&fields, "default");
            Ok(ConsoleInput::new("console_input", prompt, choices, default) as StepHandle)
        }),
    });

    registry.register({
        let runtime = runtime.clone();
        StepClass {
            path: "wf_core.steps.output.FileOutput".to_string(),
            reference_fields: INPUT_STEP_REF,
            fields: FILE_OUTPUT_FIELDS,
            construct: Box::new(move |fields, refs| {
                let path = string_field(&fields, "path")?;
                let input_step = single_reference(&refs, "input_step")?;
                Ok(FileOutput::new("file_output", input_step, path, runtime.clone()) as StepHandle)
            }),
        }
    });

    registry.register(StepClass {
        path: "wf_core.steps.pipe.TemplatePipe".to_string(),
        reference_fields: INPUT_STEP_REF,
        fields: TEMPLATE_PIPE_FIELDS,
        construct: Box::new(|fields, refs| {
            let template = string_field(&fields, "template")?;
            let input_step = single_reference(&refs, "input_step")?;
            Ok(TemplatePipe::new("template_pipe", input_step, template) as StepHandle)
        }),
    });

    registry.register({
        let runtime = runtime.clone();
        StepClass {
            path: "wf_core.steps.system.RunCommand".to_string(),
            reference_fields: &[],
            fields: RUN_COMMAND_FIELDS,
            construct: Box::new(move |fields, _refs| {
                let program = string_field(&fields, "program")?;
                let args = string_list_field(&fields, "args")?;
                let cwd = optional_string_field(&fields, "cwd");
                let poll_ms = fields.get("poll_interval_ms").and_then(Value::as_u64).unwrap_or(250);
                Ok(RunCommand::new("run_command", runtime.clone(), program, args, cwd, Duration::from_millis(poll_ms)) as StepHandle)
            }),
        }
    });

    registry.register(StepClass {
        path: "wf_core.steps.wait.Wait".to_string(),
        reference_fields: &[],
        fields: WAIT_FIELDS,
        construct: Box::new(|fields, _refs| {
            let seconds = fields.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Wait::new("wait", Duration::from_secs_f64(seconds)) as StepHandle)
        }),
    });

    registry.register(StepClass {
        path: "wf_core.steps.manual.Manual".to_string(),
        reference_fields: &[],
        fields: MANUAL_FIELDS,
        construct: Box::new(|fields, _refs| {
            let message = string_field(&fields, "message")?;
            Ok(Manual::new("manual", message) as StepHandle)
        }),
    });

    registry.register(StepClass {
        path: "wf_core.steps.monitor.Monitor".to_string(),
        reference_fields: MONITOR_REFS,
        fields: MONITOR_FIELDS,
        construct: Box::new(|fields, refs| {
            let watch_all = fields.get("watch_all").and_then(Value::as_bool).unwrap_or(false);
            let watches = list_reference(&refs, "watches");
            Ok(Monitor::new("monitor", watches, watch_all)? as StepHandle)
        }),
    });

    registry.register(StepClass {
        path: "wf_core.steps.monitor.MonitorStarter".to_string(),
        reference_fields: MONITOR_STARTER_REFS,
        fields: &[],
        construct: Box::new(|_fields, refs| {
            let monitors = list_reference(&refs, "monitors");
            Ok(MonitorStarter::new("monitor_starter", monitors) as StepHandle)
        }),
    });
}

/// Registers every builtin compiler stage under `wf_core.compilers.*`.
pub fn register_builtin_compilers(registry: &mut CompilerRegistry, class_registry: Arc<ClassRegistry>) {
    registry.register("wf_core.compilers.NamespaceCompiler", Arc::new(NamespaceCompiler { registry: class_registry }));
    registry.register("wf_core.compilers.SeparateDependencyTree", Arc::new(SeparateDependencyTree));
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_runtime::FakeRuntime;

    fn runtime() -> Arc<Mutex<dyn Runtime>> {
        Arc::new(Mutex::new(FakeRuntime::new()))
    }

    #[test]
    fn every_builtin_step_class_is_registered_under_its_dotted_path() {
        let mut registry = ClassRegistry::new();
        register_builtin_steps(&mut registry, runtime());
        for path in [
            "wf_core.steps.input.InMemoryInput",
            "wf_core.steps.input.FileInput",
            "wf_core.steps.input.StdinInput",
            "wf_core.steps.user_input.ConsoleInput",
            "wf_core.steps.output.FileOutput",
            "wf_core.steps.pipe.TemplatePipe",
            "wf_core.steps.system.RunCommand",
            "wf_core.steps.wait.Wait",
            "wf_core.steps.manual.Manual",
            "wf_core.steps.monitor.Monitor",
            "wf_core.steps.monitor.MonitorStarter",
        ] {
            assert!(registry.get_exact(path).is_some(), "missing {path}");
        }
    }

    #[test]
    fn in_memory_input_constructs_from_its_content_field() {
        let mut registry = ClassRegistry::new();
        register_builtin_steps(&mut registry, runtime());
        let class = registry.get_exact("wf_core.steps.input.InMemoryInput").unwrap();
        let fields = serde_json::json!({"content": "hi"}).as_object().unwrap().clone();
        let step = (class.construct)(fields, HashMap::new()).unwrap();
        step.run().unwrap();
        assert_eq!(step.output(), Some("hi".to_string()));
    }

    #[test]
    fn compilers_are_registered_under_their_dotted_path() {
        let class_registry = Arc::new(ClassRegistry::new());
        let mut compilers = CompilerRegistry::new();
        register_builtin_compilers(&mut compilers, class_registry);
        assert!(compilers.get("wf_core.compilers.NamespaceCompiler").is_some());
        assert!(compilers.get("wf_core.compilers.SeparateDependencyTree").is_some());
    }
}
