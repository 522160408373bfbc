//! `RunCommand` (spec §6): validates that the binary exists, launches a
//! subprocess in `run()`, and polls its exit code on `check_status()`
//! (cached for `poll_interval` to avoid hammering the OS). A non-zero exit
//! is a step run failure. Grounded in
//! `original_source/daisychain/steps/system/run_command.py`, whose
//! `cache_for` decorator is realized here as [`PollCache`].

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use wf_runtime::{ProcessHandle, Runtime};

use crate::step::{Step, StepBase};

#[derive(Debug, thiserror::Error)]
#[error("command `{program}` exited with status {code}")]
pub struct ProcessError {
    pub program: String,
    pub code: i32,
}

/// Debounces repeated `ProcessHandle::poll()` calls: once a poll returns an
/// exit code it's remembered forever; while still running, a further poll
/// is only attempted after `poll_interval` has elapsed since the last one.
struct PollCache {
    poll_interval: Duration,
    last_polled: Option<Instant>,
    cached_exit: Option<i32>,
}

impl PollCache {
    fn new(poll_interval: Duration) -> Self {
        Self { poll_interval, last_polled: None, cached_exit: None }
    }

    fn poll(&mut self, handle: &mut dyn ProcessHandle) -> Result<Option<i32>> {
        if let Some(code) = self.cached_exit {
            return Ok(Some(code));
        }
        if let Some(last) = self.last_polled {
            if last.elapsed() < self.poll_interval {
                return Ok(None);
            }
        }
        self.last_polled = Some(Instant::now());
        let result = handle.poll()?;
        if let Some(code) = result {
            self.cached_exit = Some(code);
        }
        Ok(result)
    }
}

pub struct RunCommand {
    base: StepBase,
    runtime: Arc<Mutex<dyn Runtime>>,
    program: String,
    args: Vec<String>,
    cwd: Option<String>,
    handle: Mutex<Option<Box<dyn ProcessHandle>>>,
    cache: Mutex<PollCache>,
}

impl RunCommand {
    pub fn new(
        name: impl Into<String>,
        runtime: Arc<Mutex<dyn Runtime>>,
        program: impl Into<String>,
        args: Vec<String>,
        cwd: Option<String>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: StepBase::new(name),
            runtime,
            program: program.into(),
            args,
            cwd,
            handle: Mutex::new(None),
            cache: Mutex::new(PollCache::new(poll_interval)),
        })
    }
}

impl Step for RunCommand {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn validate(&self) -> Result<()> {
        self.runtime.lock().unwrap().which(&self.program).with_context(|| format!("`{}` is not on PATH", self.program))?;
        self.base.status.set_validated();
        Ok(())
    }

    fn run(&self) -> Result<()> {
        let handle = self.runtime.lock().unwrap().spawn(&self.program, &self.args, self.cwd.as_deref())?;
        *self.handle.lock().unwrap() = Some(handle);
        self.base.status.set_running();
        Ok(())
    }

    fn check_status(&self) -> Result<()> {
        let mut handle_guard = self.handle.lock().unwrap();
        let Some(handle) = handle_guard.as_deref_mut() else {
            return Ok(());
        };
        let polled = self.cache.lock().unwrap().poll(handle)?;
        match polled {
            None => {}
            Some(0) => self.base.status.set_finished(),
            Some(code) => self.base.status.set_failed(ProcessError { program: self.program.clone(), code }.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_runtime::{FakeRuntime, ScriptedProcess};

    fn runtime(rt: FakeRuntime) -> Arc<Mutex<dyn Runtime>> {
        Arc::new(Mutex::new(rt))
    }

    #[test]
    fn validate_fails_when_binary_is_not_on_path() {
        let step = RunCommand::new("cmd", runtime(FakeRuntime::new()), "build.sh", vec![], None, Duration::ZERO);
        assert!(step.validate().is_err());
    }

    #[test]
    fn validate_succeeds_for_a_known_program() {
        let step = RunCommand::new("cmd", runtime(FakeRuntime::new().with_known_program("build.sh")), "build.sh", vec![], None, Duration::ZERO);
        step.validate().unwrap();
        assert!(step.status().validated());
    }

    #[test]
    fn zero_exit_finishes_the_step() {
        let rt = FakeRuntime::new().with_known_program("build.sh").script_process(ScriptedProcess::immediate(0));
        let step = RunCommand::new("cmd", runtime(rt), "build.sh", vec![], None, Duration::ZERO);
        step.run().unwrap();
        step.check_status().unwrap();
        assert!(step.status().finished());
    }

    #[test]
    fn nonzero_exit_fails_the_step() {
        let rt = FakeRuntime::new().with_known_program("build.sh").script_process(ScriptedProcess::immediate(1));
        let step = RunCommand::new("cmd", runtime(rt), "build.sh", vec![], None, Duration::ZERO);
        step.run().unwrap();
        step.check_status().unwrap();
        assert!(step.status().failed());
    }

    #[test]
    fn still_running_process_leaves_step_running() {
        let rt = FakeRuntime::new()
            .with_known_program("build.sh")
            .script_process(ScriptedProcess { polls_before_exit: 3, exit_code: 0 });
        let step = RunCommand::new("cmd", runtime(rt), "build.sh", vec![], None, Duration::ZERO);
        step.run().unwrap();
        step.check_status().unwrap();
        assert!(step.status().running());
    }
}
