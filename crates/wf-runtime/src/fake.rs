//! In-memory runtime double used by this crate's tests and by the test
//! suites of `wf-core`/`wf-cli`. Public (not `#[cfg(test)]`) for that reason.

use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::traits::{ProcessHandle, Runtime};

/// A subprocess outcome scripted ahead of time for [`FakeRuntime::spawn`].
#[derive(Debug, Clone)]
pub struct ScriptedProcess {
    /// How many `poll()` calls return `Ok(None)` before the process "exits".
    pub polls_before_exit: u32,
    pub exit_code: i32,
}

impl ScriptedProcess {
    pub fn immediate(exit_code: i32) -> Self {
        Self { polls_before_exit: 0, exit_code }
    }
}

/// Deterministic, fully in-memory stand-in for [`Runtime`].
///
/// Files live in a `HashMap`; subprocess behavior is scripted in advance via
/// [`FakeRuntime::script_process`]; `which` succeeds for any program named in
/// `known_programs`; `read_line` drains a queue of canned responses.
pub struct FakeRuntime {
    workdir: PathBuf,
    files: HashMap<String, String>,
    known_programs: HashMap<String, PathBuf>,
    scripted_processes: VecDeque<ScriptedProcess>,
    scripted_lines: VecDeque<String>,
    pub spawned: Vec<(String, Vec<String>, Option<String>)>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            workdir: PathBuf::from("/fake"),
            files: HashMap::new(),
            known_programs: HashMap::new(),
            scripted_processes: VecDeque::new(),
            scripted_lines: VecDeque::new(),
            spawned: Vec::new(),
        }
    }

    pub fn with_file(mut self, rel: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(rel.into(), content.into());
        self
    }

    pub fn with_known_program(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = PathBuf::from(format!("/fake/bin/{name}"));
        self.known_programs.insert(name, path);
        self
    }

    pub fn script_process(mut self, process: ScriptedProcess) -> Self {
        self.scripted_processes.push_back(process);
        self
    }

    pub fn script_line(mut self, line: impl Into<String>) -> Self {
        self.scripted_lines.push_back(line.into());
        self
    }

    pub fn file(&self, rel: &str) -> Option<&str> {
        self.files.get(rel).map(String::as_str)
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for FakeRuntime {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn read_text(&self, rel: &str) -> Result<String> {
        self.files.get(rel).cloned().with_context(|| format!("no such fake file: {rel}"))
    }

    fn write_text(&mut self, rel: &str, content: &str) -> Result<()> {
        self.files.insert(rel.to_string(), content.to_string());
        Ok(())
    }

    fn which(&self, program: &str) -> Result<PathBuf> {
        self.known_programs
            .get(program)
            .cloned()
            .with_context(|| format!("`{program}` not registered with this fake runtime"))
    }

    fn spawn(&mut self, program: &str, args: &[String], cwd: Option<&str>) -> Result<Box<dyn ProcessHandle>> {
        self.spawned.push((program.to_string(), args.to_vec(), cwd.map(str::to_string)));
        let script = self.scripted_processes.pop_front().unwrap_or(ScriptedProcess::immediate(0));
        Ok(Box::new(FakeProcessHandle { remaining_polls: script.polls_before_exit, exit_code: script.exit_code }))
    }

    fn read_line(&mut self, _prompt: &str) -> Result<String> {
        self.scripted_lines.pop_front().context("no more scripted input lines")
    }
}

struct FakeProcessHandle {
    remaining_polls: u32,
    exit_code: i32,
}

impl ProcessHandle for FakeProcessHandle {
    fn poll(&mut self) -> Result<Option<i32>> {
        if self.remaining_polls == 0 {
            Ok(Some(self.exit_code))
        } else {
            self.remaining_polls -= 1;
            Ok(None)
        }
    }
}
