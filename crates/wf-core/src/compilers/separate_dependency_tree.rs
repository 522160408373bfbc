//! Splits a top-level `__dependencies__` tree (`step name -> [dependency
//! step names]`) into each step's own `dependencies` list. Grounded in
//! `original_source/daisychain/steps/compilers/separate_dependency_tree.py`.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::compilers::Compiler;
use crate::config::{DEPENDENCIES_KEY, DEPENDENCIES_TREE_KEY, STEPS_KEY};

/// Compiler registered under `wf_core.compilers.SeparateDependencyTree`.
pub struct SeparateDependencyTree;

impl Compiler for SeparateDependencyTree {
    fn compile(&self, mut document: Value) -> Result<Value> {
        let Some(map) = document.as_object_mut() else {
            anyhow::bail!("SeparateDependencyTree expects a mapping document");
        };
        let Some(tree_value) = map.remove(DEPENDENCIES_TREE_KEY) else {
            return Ok(document);
        };
        let tree = tree_value
            .as_object()
            .ok_or_else(|| anyhow!("`{DEPENDENCIES_TREE_KEY}` must be a mapping of step name to dependency list"))?
            .clone();

        let map = document.as_object_mut().expect("checked above");
        let steps = map
            .get_mut(STEPS_KEY)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| anyhow!("document has no `{STEPS_KEY}` mapping"))?;

        for (step_name, dep_list) in tree {
            let Some(step_cfg) = steps.get_mut(&step_name) else { continue };
            let Some(step_map) = step_cfg.as_object_mut() else { continue };
            if step_map.contains_key(DEPENDENCIES_KEY) {
                anyhow::bail!(
                    "step {step_name:?} specifies both a `{DEPENDENCIES_TREE_KEY}` entry and its own `{DEPENDENCIES_KEY}`"
                );
            }
            step_map.insert(DEPENDENCIES_KEY.to_string(), dep_list);
        }

        Ok(document)
    }
}

/// Function form used directly by callers that don't need the `Compiler`
/// trait object (e.g. unit tests, or a hand-rolled compile pipeline).
pub fn separate_dependency_tree(document: Value) -> Result<Value> {
    SeparateDependencyTree.compile(document)
}
