//! The config-compiler pipeline (spec §6 "Compilers pipeline"): a chain of
//! transforms over the in-memory configuration document, run before the
//! Instantiator ever sees it. Grounded in
//! `original_source/daisy/steps/compilers/*.py` and
//! `original_source/daisychain/steps/compilers/separate_dependency_tree.py`.
//!
//! Unlike the rest of the engine, compiler stages operate directly on
//! `serde_json::Value` rather than going through the `Step`/`Executor`
//! machinery: a compiler's whole job is a pure document-to-document
//! transform, and routing it through the step graph would buy nothing but
//! ceremony.

mod chain;
mod namespace_compiler;
mod separate_dependency_tree;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

pub use chain::{run_chain, RUN_FROM_HERE};
pub use namespace_compiler::{resolve_namespaced_classes, NamespaceCompiler};
pub use separate_dependency_tree::{separate_dependency_tree, SeparateDependencyTree};

/// A single stage of the compiler pipeline: takes the document as it
/// stands after its upstream stage and returns the document to hand to the
/// next one (or to the Instantiator, for the final stage).
pub trait Compiler: Send + Sync {
    fn compile(&self, document: Value) -> Result<Value>;
}

/// Maps a compiler's dotted class path (as written under a `compilers`
/// section's `class` key) to the [`Compiler`] implementation that runs it.
/// Populated by `builtin::register_builtin_compilers` alongside the step
/// `ClassRegistry`.
#[derive(Default, Clone)]
pub struct CompilerRegistry {
    compilers: HashMap<String, Arc<dyn Compiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_path: impl Into<String>, compiler: Arc<dyn Compiler>) {
        self.compilers.insert(class_path.into(), compiler);
    }

    pub fn get(&self, class_path: &str) -> Option<&Arc<dyn Compiler>> {
        self.compilers.get(class_path)
    }
}
