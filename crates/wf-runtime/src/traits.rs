//! Core runtime traits and types.

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Runtime mediates every side effect a leaf step can have, so the engine
/// can be driven entirely by fakes in tests.
pub trait Runtime: Send {
    fn workdir(&self) -> &Path;

    fn read_text(&self, rel: &str) -> Result<String>;
    fn write_text(&mut self, rel: &str, content: &str) -> Result<()>;

    /// Resolve `program` on the runtime's notion of `PATH`. Used by
    /// `RunCommand::validate`.
    fn which(&self, program: &str) -> Result<PathBuf>;

    /// Launch a subprocess without blocking for completion. Progress is
    /// observed later through the returned handle's `poll`.
    fn spawn(&mut self, program: &str, args: &[String], cwd: Option<&str>) -> Result<Box<dyn ProcessHandle>>;

    /// Read one line of input after displaying `prompt`.
    fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// A non-blocking handle to a spawned subprocess.
pub trait ProcessHandle: Send {
    /// `Ok(None)` while the process is still running; `Ok(Some(code))`
    /// once it has exited.
    fn poll(&mut self) -> Result<Option<i32>>;
}
