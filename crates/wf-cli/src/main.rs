use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use wf_core::config::COMPILERS_KEY;
use wf_core::{
    compilers::{run_chain, separate_dependency_tree}, register_builtin_compilers, register_builtin_steps, ClassRegistry, CompilerRegistry,
    ConsolePrompter, Executor, Instantiator, NoPrompter, OnFailure, Prompter, StepHandle, WorkflowDocument,
};
use wf_runtime::{Runtime, SystemRuntime};

#[derive(Parser, Debug)]
#[command(name = "wf", version, about = "Dependency-resolution workflow engine CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a workflow document: compile it, instantiate its steps, then
    /// execute them.
    Run {
        /// Path to the workflow document (YAML or JSON). Reads standard
        /// input if omitted.
        workflow: Option<PathBuf>,
        /// Work directory used by filesystem- and process-backed steps.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Failure policy for the top-level execution: raise, skip,
        /// "graceful shutdown", or prompt.
        #[arg(long, default_value = "raise")]
        on_failure: String,
        /// Interval between re-checks of steps left `Running`.
        #[arg(long, default_value_t = 250)]
        scan_interval_ms: u64,
        /// Validate and instantiate the workflow without running any step.
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse and compile a workflow document, printing the result (debug).
    Show {
        /// Path to the workflow document (YAML or JSON). Reads standard
        /// input if omitted.
        workflow: Option<PathBuf>,
        /// Work directory; only used to resolve namespaced classes the same
        /// way `run` would.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

fn read_input(workflow: Option<&PathBuf>) -> Result<String> {
    match workflow {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read {}", path.display())),
        None => {
            use std::io::Read;
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("read workflow document from stdin")?;
            Ok(text)
        }
    }
}

/// Builds the class/compiler registries this CLI knows about, backed by a
/// single [`SystemRuntime`] rooted at `workdir` (shared by every leaf step
/// the Instantiator eventually constructs).
fn build_registries(workdir: &PathBuf) -> Result<(Arc<ClassRegistry>, CompilerRegistry, Arc<Mutex<dyn Runtime>>)> {
    std::fs::create_dir_all(workdir).with_context(|| format!("create workdir {}", workdir.display()))?;
    let runtime: Arc<Mutex<dyn Runtime>> = Arc::new(Mutex::new(SystemRuntime::new(workdir.clone())));

    let mut class_registry = ClassRegistry::new();
    register_builtin_steps(&mut class_registry, runtime.clone());
    let class_registry = Arc::new(class_registry);

    let mut compiler_registry = CompilerRegistry::new();
    register_builtin_compilers(&mut compiler_registry, class_registry.clone());

    Ok((class_registry, compiler_registry, runtime))
}

/// Runs the document through the compiler pipeline (spec §6 "Compilers
/// pipeline") if it declares one, then unconditionally applies
/// `SeparateDependencyTree` so a bare `__dependencies__` tree works even in
/// documents with no `compilers` section at all -- a user only needs to name
/// `SeparateDependencyTree` in `compilers` if they want it to run at a
/// specific point relative to other stages.
fn compile_document(mut document: Value, registry: &CompilerRegistry) -> Result<Value> {
    let compilers_value = document.as_object_mut().and_then(|m| m.remove(COMPILERS_KEY));
    let compiled = match compilers_value {
        Some(compilers) => run_chain(document, compilers, registry)?,
        None => document,
    };
    separate_dependency_tree(compiled)
}

fn parse_and_compile(workflow: Option<&PathBuf>, compiler_registry: &CompilerRegistry) -> Result<WorkflowDocument> {
    let text = read_input(workflow)?;
    let raw: Value = serde_yaml::from_str(&text).context("parse workflow document")?;
    let compiled = compile_document(raw, compiler_registry)?;
    WorkflowDocument::from_value(compiled)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap())).init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Show { workflow, workdir } => {
            let (_class_registry, compiler_registry, _runtime) = build_registries(&workdir)?;
            let document = parse_and_compile(workflow.as_ref(), &compiler_registry)?;
            println!("{}", serde_json::to_string_pretty(&document.into_value())?);
            Ok(())
        }
        Cmd::Run { workflow, workdir, on_failure, scan_interval_ms, dry_run } => {
            let on_failure: OnFailure = on_failure.parse()?;
            let (class_registry, compiler_registry, _runtime) = build_registries(&workdir)?;
            let document = parse_and_compile(workflow.as_ref(), &compiler_registry)?;

            let namespaces = match &document.namespaces {
                Some(v) => wf_core::config::namespaces_from_value(v)?,
                None => Vec::new(),
            };

            let instantiator = Instantiator::new("instantiator", document.steps, namespaces, class_registry);
            let instantiator_handle: StepHandle = instantiator.clone();
            let instantiation_executor =
                Executor::new("instantiate", vec![instantiator_handle], OnFailure::Raise, Duration::ZERO, false, Box::new(NoPrompter));
            instantiation_executor.execute().context("instantiating the workflow's steps")?;

            let leaf_steps: Vec<StepHandle> = instantiator.steps.lock().unwrap().values().cloned().collect();
            tracing::info!(count = leaf_steps.len(), "instantiated steps");

            let prompter: Box<dyn Prompter> = match on_failure {
                OnFailure::Prompt => Box::new(ConsolePrompter::new(Box::new(SystemRuntime::new(workdir.clone())))),
                _ => Box::new(NoPrompter),
            };

            let executor = Executor::new("workflow", leaf_steps, on_failure, Duration::from_millis(scan_interval_ms), dry_run, prompter);
            let report = executor.execute()?;

            tracing::info!(finished = report.finished.len(), failed = report.failed.len(), aborted = report.aborted, "execution complete");
            if report.aborted || !report.failed.is_empty() {
                anyhow::bail!("workflow did not complete cleanly: {} step(s) failed, aborted = {}", report.failed.len(), report.aborted);
            }
            Ok(())
        }
    }
}
