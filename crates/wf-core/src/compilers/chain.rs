//! Linearizes (or runs as-given) a `compilers` section into an ordered
//! pipeline of [`Compiler`] stages over the configuration document.
//! Grounded in `original_source/daisy/steps/compilers/chain.py`.
//!
//! A `compilers` value is either:
//! - a **list**, each entry a bare class-path string or a `{class, name?}`
//!   mapping, implicitly wired front to back (each stage's input is the
//!   previous stage's output, and the first stage's input is the document
//!   itself). Repeated class names get a numeric suffix so they can still
//!   be addressed individually. A literal `"run_from_here"` entry marks
//!   the preceding stage as the one whose output becomes the final result;
//!   with no such marker, the result is the last stage's output.
//! - a **mapping** of stage name to `{class, input_step?, run_from_here?}`,
//!   letting stages reference any other stage's output by name (not just
//!   the previous one). Exactly one entry must set `run_from_here: true`.
//!
//! Unlike the source (`daisy/steps/compilers/chain.py`'s `compile`, which
//! instantiates every stage and `Executor.execute()`s the whole
//! `output_config` regardless of where `run_from_here` falls), `evaluate`
//! below is lazy: it only resolves `run_from`'s own chain of `input_step`
//! ancestors. A stage positioned after `run_from` (linear form) or
//! unreachable from it (mapping form) is never evaluated, so an error a
//! downstream-only stage would have raised in the source is not surfaced
//! here. Harmless for this crate's own compiler stages, which are pure
//! document transforms with no side effects to skip.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::compilers::CompilerRegistry;
use crate::config::CLASS_KEY;

pub const RUN_FROM_HERE: &str = "run_from_here";

/// Sentinel `input_step` name standing for the original document handed to
/// `run_chain`, before any compiler stage has touched it.
const INPUT_STEP_NAME: &str = "<<INMEMORYCOMPILERSTART>>";

#[derive(Debug, Clone)]
struct CompilerEntry {
    class_path: String,
    input_step: String,
}

/// Runs `compilers_value` (the document's `compilers` section) as a
/// pipeline over `document`, returning the output of whichever stage is
/// marked (explicitly or by position) as the one to run from.
pub fn run_chain(document: Value, compilers_value: Value, registry: &CompilerRegistry) -> Result<Value> {
    let (entries, run_from) = match compilers_value {
        Value::Array(list) => make_linear_chain(list)?,
        Value::Object(map) => build_mapping_chain(map)?,
        other => anyhow::bail!("`compilers` must be a list or mapping, got {other}"),
    };

    let mut cache: HashMap<String, Value> = HashMap::new();
    let mut visiting: Vec<String> = Vec::new();
    evaluate(&run_from, &entries, &document, &mut cache, registry, &mut visiting)
}

fn make_linear_chain(list: Vec<Value>) -> Result<(Vec<(String, CompilerEntry)>, String)> {
    let mut entries: Vec<(String, CompilerEntry)> = Vec::new();
    let mut previous_input_step = INPUT_STEP_NAME.to_string();
    let mut run_from_step: Option<String> = None;

    for item in list {
        match item {
            Value::String(s) if s == RUN_FROM_HERE => {
                if run_from_step.is_some() {
                    anyhow::bail!("`{RUN_FROM_HERE}` can only appear once in a compilers list");
                }
                run_from_step = Some(previous_input_step.clone());
            }
            Value::String(class_path) => {
                let name = unique_name(&entries, &class_path);
                previous_input_step = push_entry(&mut entries, name, class_path, previous_input_step);
            }
            Value::Object(map) => {
                let class_path = map
                    .get(CLASS_KEY)
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("compiler list entry is missing `class`"))?
                    .to_string();
                let base_name = map.get("name").and_then(Value::as_str).unwrap_or(&class_path).to_string();
                let name = unique_name(&entries, &base_name);
                previous_input_step = push_entry(&mut entries, name, class_path, previous_input_step);
            }
            other => anyhow::bail!("compiler list entries must be a string or mapping, got {other}"),
        }
    }

    let run_from = run_from_step.unwrap_or(previous_input_step);
    Ok((entries, run_from))
}

fn unique_name(entries: &[(String, CompilerEntry)], base: &str) -> String {
    let taken = |n: &str| entries.iter().any(|(k, _)| k == n);
    if !taken(base) {
        return base.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{base}.{i}");
        if !taken(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

fn push_entry(entries: &mut Vec<(String, CompilerEntry)>, name: String, class_path: String, input_step: String) -> String {
    entries.push((name.clone(), CompilerEntry { class_path, input_step }));
    name
}

fn build_mapping_chain(map: Map<String, Value>) -> Result<(Vec<(String, CompilerEntry)>, String)> {
    let mut entries = Vec::new();
    let mut run_from: Option<String> = None;

    for (name, cfg) in map {
        let cfg_map = cfg
            .as_object()
            .ok_or_else(|| anyhow!("compiler `{name}` config must be a mapping"))?;
        let class_path = cfg_map
            .get(CLASS_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("compiler `{name}` is missing `class`"))?
            .to_string();
        let input_step = cfg_map.get("input_step").and_then(Value::as_str).unwrap_or(INPUT_STEP_NAME).to_string();
        if cfg_map.get(RUN_FROM_HERE).and_then(Value::as_bool).unwrap_or(false) {
            if run_from.is_some() {
                anyhow::bail!("only one compiler entry can set `{RUN_FROM_HERE}`");
            }
            run_from = Some(name.clone());
        }
        entries.push((name, CompilerEntry { class_path, input_step }));
    }

    let run_from = run_from.ok_or_else(|| anyhow!("exactly one compiler entry must set `{RUN_FROM_HERE}` in the mapping form"))?;
    Ok((entries, run_from))
}

fn evaluate(
    name: &str,
    entries: &[(String, CompilerEntry)],
    document: &Value,
    cache: &mut HashMap<String, Value>,
    registry: &CompilerRegistry,
    visiting: &mut Vec<String>,
) -> Result<Value> {
    if name == INPUT_STEP_NAME {
        return Ok(document.clone());
    }
    if let Some(cached) = cache.get(name) {
        return Ok(cached.clone());
    }
    if visiting.iter().any(|n| n == name) {
        anyhow::bail!("compiler pipeline has a cycle reaching `{name}`");
    }

    let entry = entries
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| anyhow!("compiler `{name}` is not defined"))?;

    visiting.push(name.to_string());
    let input_value = evaluate(&entry.input_step, entries, document, cache, registry, visiting)?;
    visiting.pop();

    let compiler = registry
        .get(&entry.class_path)
        .ok_or_else(|| anyhow!("no compiler registered for class `{}`", entry.class_path))?;
    let output = compiler.compile(input_value)?;
    cache.insert(name.to_string(), output.clone());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilers::Compiler;
    use std::sync::Arc;

    struct AddKey(&'static str, Value);
    impl Compiler for AddKey {
        fn compile(&self, document: Value) -> Result<Value> {
            let mut map = document.as_object().cloned().unwrap_or_default();
            map.insert(self.0.to_string(), self.1.clone());
            Ok(Value::Object(map))
        }
    }

    fn registry() -> CompilerRegistry {
        let mut r = CompilerRegistry::new();
        r.register("test.AddA", Arc::new(AddKey("a", Value::Bool(true))));
        r.register("test.AddB", Arc::new(AddKey("b", Value::Bool(true))));
        r
    }

    #[test]
    fn linear_list_defaults_to_last_stage() {
        let doc = serde_json::json!({});
        let compilers = serde_json::json!(["test.AddA", "test.AddB"]);
        let out = run_chain(doc, compilers, &registry()).unwrap();
        assert_eq!(out["a"], true);
        assert_eq!(out["b"], true);
    }

    #[test]
    fn run_from_here_stops_the_returned_value_early() {
        let doc = serde_json::json!({});
        let compilers = serde_json::json!(["test.AddA", "run_from_here", "test.AddB"]);
        let out = run_chain(doc, compilers, &registry()).unwrap();
        assert_eq!(out["a"], true);
        assert!(out.get("b").is_none());
    }

    #[test]
    fn repeated_class_names_get_numeric_suffixes() {
        let doc = serde_json::json!({});
        let compilers = serde_json::json!(["test.AddA", "test.AddA"]);
        let out = run_chain(doc, compilers, &registry()).unwrap();
        assert_eq!(out["a"], true);
    }

    #[test]
    fn mapping_form_requires_exactly_one_run_from_here() {
        let doc = serde_json::json!({});
        let compilers = serde_json::json!({
            "first": {"class": "test.AddA"},
            "second": {"class": "test.AddB", "input_step": "first"},
        });
        let err = run_chain(doc, compilers, &registry()).unwrap_err();
        assert!(err.to_string().contains(RUN_FROM_HERE));
    }

    #[test]
    fn mapping_form_honors_explicit_input_step_wiring() {
        let doc = serde_json::json!({});
        let compilers = serde_json::json!({
            "first": {"class": "test.AddA"},
            "second": {"class": "test.AddB", "input_step": "first", "run_from_here": true},
        });
        let out = run_chain(doc, compilers, &registry()).unwrap();
        assert_eq!(out["a"], true);
        assert_eq!(out["b"], true);
    }
}
