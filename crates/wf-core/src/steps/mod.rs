//! Concrete leaf steps (spec §6): the external collaborators the core
//! composes but never depends on for its own graph/executor/monitor logic.

pub mod input;
pub mod manual;
pub mod output;
pub mod pipe;
pub mod run_command;
pub mod threaded_step;
pub mod user_input;
pub mod wait;

pub use input::{FileInput, InMemoryInput, StdinInput};
pub use manual::Manual;
pub use output::FileOutput;
pub use pipe::TemplatePipe;
pub use run_command::{ProcessError, RunCommand};
pub use threaded_step::ThreadedStep;
pub use user_input::ConsoleInput;
pub use wait::Wait;
