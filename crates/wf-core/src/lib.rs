//! The workflow engine itself: the [`step::Step`] contract, the two-phase
//! [`executor::Executor`], the config-driven [`instantiator::Instantiator`]
//! (C7) that materializes a graph from a JSON document, the
//! [`compilers`] pipeline that prepares that document beforehand (C8-C10),
//! and the concrete [`steps`] the rest of it composes.

pub mod builtin;
pub mod class_registry;
pub mod compilers;
pub mod config;
pub mod executor;
pub mod instantiator;
pub mod monitor;
pub mod render;
pub mod step;
pub mod steps;

pub use builtin::{register_builtin_compilers, register_builtin_steps};
pub use class_registry::{ClassLookupError, ClassRegistry, ResolvedReference, StepClass};
pub use compilers::{Compiler, CompilerRegistry};
pub use config::WorkflowDocument;
pub use executor::{ConsolePrompter, Executor, ExecutionReport, NoPrompter, OnFailure, Prompter, ScriptedPrompter};
pub use instantiator::Instantiator;
pub use monitor::{Monitor, MonitorStarter};
pub use step::{Step, StepBase, StepHandle};
