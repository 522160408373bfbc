//! Resolves `class` entries scoped under a `__namespaces__` section against
//! the [`ClassRegistry`], replacing the relative path written in the
//! document with the fully-qualified one the Instantiator can look up
//! directly. Grounded in
//! `original_source/daisy/steps/compilers/namespace_compiler.py`.
//!
//! The source walks the config tree with a pair of nested generators: an
//! outer one that finds every `__namespaces__`-bearing subsection, and an
//! inner one that finds the `class` entries scoped to each, stopping at any
//! nested subsection with its own `__namespaces__` (that one gets handled
//! by the outer walk's own visit to it). This realizes the same rule as a
//! single recursive walk carrying the "currently active" namespace list,
//! replaced wholesale whenever a subsection declares its own -- simpler to
//! express without Rust's aliasing rules getting in the way, and
//! observably identical: every `class` entry still resolves against the
//! narrowest enclosing `__namespaces__`.

use anyhow::Result;
use serde_json::Value;

use crate::class_registry::ClassRegistry;
use crate::compilers::Compiler;
use crate::config::{namespaces_from_value, CLASS_KEY, NAMESPACES_KEY};

pub struct NamespaceCompiler {
    pub registry: std::sync::Arc<ClassRegistry>,
}

impl Compiler for NamespaceCompiler {
    fn compile(&self, mut document: Value) -> Result<Value> {
        resolve_namespaced_classes(&mut document, &self.registry)?;
        Ok(document)
    }
}

/// Mutates `value` in place, rewriting every `class` string found under a
/// `__namespaces__` section to the matching registry entry's full path.
/// A `class` value that resolves against no registered class is left
/// untouched -- the Instantiator raises its own `ClassLookupError` when it
/// actually tries to construct that step, which carries more context than
/// this pass could.
pub fn resolve_namespaced_classes(value: &mut Value, registry: &ClassRegistry) -> Result<()> {
    resolve_rec(value, &[], registry)
}

fn resolve_rec(value: &mut Value, inherited: &[String], registry: &ClassRegistry) -> Result<()> {
    match value {
        Value::Object(map) => {
            let active = match map.remove(NAMESPACES_KEY) {
                Some(v) => namespaces_from_value(&v)?,
                None => inherited.to_vec(),
            };

            if !active.is_empty() {
                if let Some(class_path) = map.get(CLASS_KEY).and_then(Value::as_str) {
                    if let Ok(step_class) = registry.find_class(class_path, &active) {
                        map.insert(CLASS_KEY.to_string(), Value::String(step_class.path.clone()));
                    }
                }
            }

            for v in map.values_mut() {
                resolve_rec(v, &active, registry)?;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                resolve_rec(item, inherited, registry)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_registry::StepClass;

    fn registry_with(path: &str) -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry.register(StepClass {
            path: path.to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(|_fields, _refs| anyhow::bail!("not used in these tests")),
        });
        registry
    }

    #[test]
    fn resolves_class_under_namespace_scope() {
        let registry = registry_with("wf_core.steps.input.FileInput");
        let mut doc = serde_json::json!({
            "__namespaces__": "wf_core.steps",
            "steps": {"a": {"class": "input.FileInput"}},
        });
        resolve_namespaced_classes(&mut doc, &registry).unwrap();
        assert_eq!(doc["steps"]["a"]["class"], "wf_core.steps.input.FileInput");
        assert!(doc.get("__namespaces__").is_none());
    }

    #[test]
    fn nested_namespaces_override_outer_scope() {
        let mut registry = ClassRegistry::new();
        registry.register(StepClass {
            path: "outer.Foo".to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(|_f, _r| anyhow::bail!("unused")),
        });
        registry.register(StepClass {
            path: "inner.Bar".to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(|_f, _r| anyhow::bail!("unused")),
        });
        let mut doc = serde_json::json!({
            "__namespaces__": "outer",
            "steps": {
                "a": {"class": "Foo"},
                "nested": {
                    "__namespaces__": "inner",
                    "b": {"class": "Bar"},
                },
            },
        });
        resolve_namespaced_classes(&mut doc, &registry).unwrap();
        assert_eq!(doc["steps"]["a"]["class"], "outer.Foo");
        assert_eq!(doc["steps"]["nested"]["b"]["class"], "inner.Bar");
    }

    #[test]
    fn unresolvable_class_is_left_untouched() {
        let registry = ClassRegistry::new();
        let mut doc = serde_json::json!({
            "__namespaces__": "wf_core.steps",
            "steps": {"a": {"class": "nope.Nothing"}},
        });
        resolve_namespaced_classes(&mut doc, &registry).unwrap();
        assert_eq!(doc["steps"]["a"]["class"], "nope.Nothing");
    }

    #[test]
    fn no_namespaces_section_is_a_noop() {
        let registry = registry_with("wf_core.steps.input.FileInput");
        let mut doc = serde_json::json!({"steps": {"a": {"class": "input.FileInput"}}});
        let before = doc.clone();
        resolve_namespaced_classes(&mut doc, &registry).unwrap();
        assert_eq!(doc, before);
    }
}
