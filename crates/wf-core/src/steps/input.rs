//! The `Input` family (spec §6): steps that expose an `output` string once
//! finished, sourced from an in-memory buffer, a file, or standard input.
//! Grounded in `original_source/daisychain/steps/input.py` and
//! `daisy/steps/input.py`. (Prompt-driven input lives in `user_input.rs`.)

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use wf_runtime::Runtime;

use crate::step::{Step, StepBase};

/// An input whose content is supplied directly at construction time, used
/// by the config-compiler pipeline to hand the original document to its
/// first stage, and by tests that don't need a real file.
pub struct InMemoryInput {
    base: StepBase,
    content: String,
    output: Mutex<Option<String>>,
}

impl InMemoryInput {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), content: content.into(), output: Mutex::new(None) })
    }
}

impl Step for InMemoryInput {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        *self.output.lock().unwrap() = Some(self.content.clone());
        self.base.status.set_finished();
        Ok(())
    }

    fn output(&self) -> Option<String> {
        self.output.lock().unwrap().clone()
    }
}

/// Reads its output from a file through the [`Runtime`], relative to the
/// runtime's working directory.
pub struct FileInput {
    base: StepBase,
    path: String,
    runtime: Arc<Mutex<dyn Runtime>>,
    output: Mutex<Option<String>>,
}

impl FileInput {
    pub fn new(name: impl Into<String>, path: impl Into<String>, runtime: Arc<Mutex<dyn Runtime>>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), path: path.into(), runtime, output: Mutex::new(None) })
    }
}

impl Step for FileInput {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        let content = self.runtime.lock().unwrap().read_text(&self.path)?;
        *self.output.lock().unwrap() = Some(content);
        self.base.status.set_finished();
        Ok(())
    }

    fn output(&self) -> Option<String> {
        self.output.lock().unwrap().clone()
    }
}

/// Reads one line from standard input through the [`Runtime`].
pub struct StdinInput {
    base: StepBase,
    runtime: Arc<Mutex<dyn Runtime>>,
    output: Mutex<Option<String>>,
}

impl StdinInput {
    pub fn new(name: impl Into<String>, runtime: Arc<Mutex<dyn Runtime>>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), runtime, output: Mutex::new(None) })
    }
}

impl Step for StdinInput {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        let line = self.runtime.lock().unwrap().read_line("")?;
        *self.output.lock().unwrap() = Some(line);
        self.base.status.set_finished();
        Ok(())
    }

    fn output(&self) -> Option<String> {
        self.output.lock().unwrap().clone()
    }
}
