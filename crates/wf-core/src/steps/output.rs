//! The `Output` family (spec §6): a step that references an `Input` and
//! writes its output to a sink on finishing. Grounded in
//! `original_source/daisychain/steps/output.py` and `daisy/steps/output.py`.

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use wf_runtime::Runtime;

use crate::step::{Step, StepBase, StepHandle};

/// Writes its `input_step`'s output to a file through the [`Runtime`].
pub struct FileOutput {
    base: StepBase,
    input_step: StepHandle,
    path: String,
    runtime: Arc<Mutex<dyn Runtime>>,
}

impl FileOutput {
    pub fn new(name: impl Into<String>, input_step: StepHandle, path: impl Into<String>, runtime: Arc<Mutex<dyn Runtime>>) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), input_step, path: path.into(), runtime })
    }
}

impl Step for FileOutput {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// `input_step` affects execution order (this step cannot write before
    /// its input has finished), so it's reported regardless of
    /// `for_execution`, unlike `Monitor::watches`.
    fn extra_references(&self, _for_execution: bool) -> Vec<(String, StepHandle)> {
        vec![("input_step".to_string(), self.input_step.clone())]
    }

    fn run(&self) -> Result<()> {
        let content = self.input_step.output().context("input_step produced no output")?;
        self.runtime.lock().unwrap().write_text(&self.path, &content)?;
        self.base.status.set_finished();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::input::InMemoryInput;
    use wf_runtime::FakeRuntime;

    #[test]
    fn writes_input_steps_output_to_the_runtime() {
        let runtime: Arc<Mutex<dyn Runtime>> = Arc::new(Mutex::new(FakeRuntime::new()));
        let input = InMemoryInput::new("in", "hello world");
        input.run().unwrap();
        let output = FileOutput::new("out", input, "result.txt", runtime.clone());
        output.run().unwrap();
        assert!(output.status().finished());
        assert_eq!(runtime.lock().unwrap().read_text("result.txt").unwrap(), "hello world");
    }

    #[test]
    fn missing_input_output_is_fatal() {
        let runtime: Arc<Mutex<dyn Runtime>> = Arc::new(Mutex::new(FakeRuntime::new()));
        let input = InMemoryInput::new("in", "unused");
        let output = FileOutput::new("out", input, "result.txt", runtime);
        assert!(output.run().is_err());
    }
}
