//! The configuration document consumed by the Instantiator and the
//! compiler pipeline (spec §6 "Configuration document"). Exchanged as a
//! plain `serde_json::Value` tree rather than a fixed struct, because the
//! shape of each step's keyword arguments isn't known until its `class` key
//! has been resolved (spec §9 design note 9.1) -- the same reason
//! `StepClass::construct` in `class_registry` takes a raw JSON map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CLASS_KEY: &str = "class";
pub const DEPENDENCIES_KEY: &str = "dependencies";
pub const STEPS_KEY: &str = "steps";
pub const NAMESPACES_KEY: &str = "__namespaces__";
pub const DEPENDENCIES_TREE_KEY: &str = "__dependencies__";
pub const COMPILERS_KEY: &str = "compilers";

/// Top-level workflow document: `steps` plus the optional sections the
/// compiler pipeline consumes before the Instantiator ever sees the
/// document (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub steps: Map<String, Value>,
    #[serde(rename = "__namespaces__", default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Value>,
    #[serde(rename = "__dependencies__", default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilers: Option<Value>,
}

impl WorkflowDocument {
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        serde_json::from_value(value).map_err(|e| anyhow::anyhow!("invalid workflow document: {e}"))
    }

    /// Reassembles the document back into a plain JSON object the way the
    /// compiler pipeline steps mutate it in place (pop `compilers`, pop
    /// `__dependencies__`, rewrite `__namespaces__`-scoped `class` entries).
    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert(STEPS_KEY.to_string(), Value::Object(self.steps));
        if let Some(ns) = self.namespaces {
            map.insert(NAMESPACES_KEY.to_string(), ns);
        }
        if let Some(deps) = self.dependencies {
            map.insert(DEPENDENCIES_TREE_KEY.to_string(), Value::Object(deps));
        }
        if let Some(compilers) = self.compilers {
            map.insert(COMPILERS_KEY.to_string(), compilers);
        }
        Value::Object(map)
    }
}

/// Normalizes `__namespaces__` (spec: "scalar or list of class-path
/// prefixes") into an owned `Vec<String>`.
pub fn namespaces_from_value(value: &Value) -> anyhow::Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| anyhow::anyhow!("__namespaces__ entries must be strings")))
            .collect(),
        other => anyhow::bail!("__namespaces__ must be a string or list of strings, got {other}"),
    }
}
