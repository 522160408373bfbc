//! Dynamic class lookup (spec §4.7, C8). The source resolves a dotted
//! `class` path against Python's module system at runtime; Rust has no
//! equivalent reflection, so this is realized as an explicit, typed
//! registry that builtin and user code populate ahead of time
//! (`register_builtin_steps`), with the same wildcard-resolution rules as
//! the source's `daisy.importer.find_class`.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use wf_graph::{FieldSpec, ReferenceFieldSpec};

use crate::step::StepHandle;

#[derive(Debug, thiserror::Error)]
pub enum ClassLookupError {
    #[error("wildcard class path `{0}` cannot start with a wildcard segment")]
    LeadingWildcard(String),
    #[error("class path `{0}` contains more than two consecutive wildcards")]
    TooManyWildcards(String),
    #[error("invalid wildcard pattern derived from `{0}`: {1}")]
    InvalidPattern(String, String),
    #[error("no class registered matching `{class_path}` under namespaces {namespaces:?}")]
    NotFound { class_path: String, namespaces: Vec<String> },
}

/// A reference-valued constructor argument, resolved by the Instantiator
/// before a class's `construct` closure runs.
#[derive(Debug, Clone)]
pub enum ResolvedReference {
    Single(StepHandle),
    List(Vec<StepHandle>),
}

/// Everything the registry and the Instantiator need to build one step
/// type from a raw JSON config: which of its keys are references (so the
/// Instantiator can split them out before construction), which of the
/// remaining keys are declared plain fields (C2, checked by
/// `wf_graph::validate_fields` before `construct` ever sees them), and the
/// constructor itself.
pub struct StepClass {
    pub path: String,
    pub reference_fields: &'static [ReferenceFieldSpec],
    pub fields: &'static [FieldSpec],
    pub construct: Box<dyn Fn(Map<String, Value>, HashMap<String, ResolvedReference>) -> anyhow::Result<StepHandle> + Send + Sync>,
}

/// Maps dotted class paths to [`StepClass`] entries, resolving `class`
/// values from config documents (which may contain `*`/`**` wildcards)
/// against an ordered list of namespace prefixes.
#[derive(Default)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<StepClass>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: StepClass) {
        self.classes.insert(class.path.clone(), Arc::new(class));
    }

    pub fn get_exact(&self, path: &str) -> Option<Arc<StepClass>> {
        self.classes.get(path).cloned()
    }

    /// Resolves `rel_class_path` against `namespaces` (tried in order, with
    /// the empty namespace implicitly tried last), mirroring
    /// `daisy.importer.find_class`.
    pub fn find_class(&self, rel_class_path: &str, namespaces: &[String]) -> Result<Arc<StepClass>, ClassLookupError> {
        let mut namespaces = namespaces.to_vec();
        if !namespaces.iter().any(String::is_empty) {
            namespaces.push(String::new());
        }

        let rel = rel_class_path.trim_start_matches('.');
        for namespace in &namespaces {
            let full = join_dotted(namespace, rel);
            if !full.contains('.') {
                continue;
            }
            if let Some(found) = self.find_class_based_on_path(&full)? {
                return Ok(found);
            }
        }
        Err(ClassLookupError::NotFound { class_path: rel_class_path.to_string(), namespaces })
    }

    fn find_class_based_on_path(&self, path: &str) -> Result<Option<Arc<StepClass>>, ClassLookupError> {
        if path.contains("***") {
            return Err(ClassLookupError::TooManyWildcards(path.to_string()));
        }

        let prefix = smallest_specified_prefix(path)?;
        if prefix == path {
            // No wildcard at all: a plain, direct lookup.
            return Ok(self.classes.get(path).cloned());
        }

        let has_prefix = self.classes.keys().any(|k| k == &prefix || k.starts_with(&format!("{prefix}.")));
        if !has_prefix {
            return Ok(None);
        }

        let pattern = wildcard_to_regex(path)?;
        let mut candidates: Vec<&String> = self.classes.keys().filter(|k| k.starts_with(&prefix)).collect();
        candidates.sort();
        for key in candidates {
            if pattern.is_match(key) {
                return Ok(self.classes.get(key).cloned());
            }
        }
        Ok(None)
    }
}

fn join_dotted(namespace: &str, rel: &str) -> String {
    let namespace = namespace.trim_end_matches('.');
    if namespace.is_empty() {
        rel.to_string()
    } else {
        format!("{namespace}.{rel}")
    }
}

/// The longest leading run of non-wildcard path segments, i.e. the part of
/// the path that must already be a registered (sub)path for the wildcard
/// portion to be worth scanning. Errors if the very first segment is a
/// wildcard, matching the source's "cannot search under all packages"
/// guard.
fn smallest_specified_prefix(path: &str) -> Result<String, ClassLookupError> {
    let mut pieces: Vec<&str> = Vec::new();
    for piece in path.split('.') {
        if piece.contains('*') {
            if pieces.is_empty() {
                return Err(ClassLookupError::LeadingWildcard(path.to_string()));
            }
            return Ok(pieces.join("."));
        }
        pieces.push(piece);
    }
    Ok(pieces.join("."))
}

/// Translates a dotted class path that may contain `*` (matches exactly
/// one path segment) and `**` (matches anything, across segments) into an
/// anchored regex.
fn wildcard_to_regex(path: &str) -> Result<Regex, ClassLookupError> {
    let mut pattern = String::from("^");
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => pattern.push_str("\\."),
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str(".*");
                } else {
                    pattern.push_str("[^.]+");
                }
            }
            other => pattern.push(other),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| ClassLookupError::InvalidPattern(path.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_class(path: &str) -> StepClass {
        StepClass {
            path: path.to_string(),
            reference_fields: &[],
            fields: &[],
            construct: Box::new(|_fields, _refs| anyhow::bail!("not used in these tests")),
        }
    }

    #[test]
    fn exact_path_resolves_directly() {
        let mut registry = ClassRegistry::new();
        registry.register(dummy_class("wf_core.steps.input.Input"));
        let found = registry.find_class("wf_core.steps.input.Input", &[]).unwrap();
        assert_eq!(found.path, "wf_core.steps.input.Input");
    }

    #[test]
    fn namespace_prefix_is_tried_before_bare_path() {
        let mut registry = ClassRegistry::new();
        registry.register(dummy_class("myapp.steps.Build"));
        let found = registry.find_class("steps.Build", &["myapp".to_string()]).unwrap();
        assert_eq!(found.path, "myapp.steps.Build");
    }

    #[test]
    fn single_star_matches_one_segment() {
        let mut registry = ClassRegistry::new();
        registry.register(dummy_class("wf_core.steps.input.Input"));
        let found = registry.find_class("wf_core.steps.*.Input", &[]).unwrap();
        assert_eq!(found.path, "wf_core.steps.input.Input");
    }

    #[test]
    fn single_star_does_not_cross_dots() {
        let mut registry = ClassRegistry::new();
        registry.register(dummy_class("wf_core.steps.input.Input"));
        let err = registry.find_class("wf_core.*.Input", &[]).unwrap_err();
        assert!(matches!(err, ClassLookupError::NotFound { .. }));
    }

    #[test]
    fn double_star_crosses_dots() {
        let mut registry = ClassRegistry::new();
        registry.register(dummy_class("wf_core.steps.input.Input"));
        let found = registry.find_class("wf_core.**.Input", &[]).unwrap();
        assert_eq!(found.path, "wf_core.steps.input.Input");
    }

    #[test]
    fn three_consecutive_wildcards_is_an_error() {
        let registry = ClassRegistry::new();
        let err = registry.find_class("wf_core.***.Input", &[]).unwrap_err();
        assert!(matches!(err, ClassLookupError::TooManyWildcards(_)));
    }

    #[test]
    fn leading_wildcard_segment_is_an_error() {
        let registry = ClassRegistry::new();
        let err = registry.find_class("*.Input", &[]).unwrap_err();
        assert!(matches!(err, ClassLookupError::LeadingWildcard(_)));
    }

    #[test]
    fn unregistered_path_is_not_found() {
        let registry = ClassRegistry::new();
        let err = registry.find_class("nope.Nothing", &[]).unwrap_err();
        assert!(matches!(err, ClassLookupError::NotFound { .. }));
    }
}
