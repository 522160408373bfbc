//! Runtime abstraction layer mediating every side effect a workflow step
//! can have: file I/O, subprocess spawn/poll, and console prompts.

mod fake;
mod system;
mod traits;

pub use fake::{FakeRuntime, ScriptedProcess};
pub use system::SystemRuntime;
pub use traits::{ProcessHandle, Runtime};
