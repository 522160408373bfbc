//! `Pipe` (spec §6): both an `Input` and an `Output`, transforming
//! `input_step.output()` into its own `output`. The source's
//! `JsonConvertPipe` is explicitly **not** implemented (Non-goal: "JSON
//! transforms", spec.md §1); this realizes the same `Pipe` contract with a
//! small `{{var}}` template substitution instead, grounded in the teacher
//! crate's own `render_template` helper (see `render.rs`).

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::render::render_template;
use crate::step::{Step, StepBase, StepHandle};

/// Renders `template` with `{{input}}` bound to `input_step.output()`.
pub struct TemplatePipe {
    base: StepBase,
    input_step: StepHandle,
    template: String,
    output: Mutex<Option<String>>,
}

impl TemplatePipe {
    pub fn new(name: impl Into<String>, input_step: StepHandle, template: impl Into<String>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { base: StepBase::new(name), input_step, template: template.into(), output: Mutex::new(None) })
    }
}

impl Step for TemplatePipe {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn extra_references(&self, _for_execution: bool) -> Vec<(String, StepHandle)> {
        vec![("input_step".to_string(), self.input_step.clone())]
    }

    fn run(&self) -> Result<()> {
        let input = self.input_step.output().context("input_step produced no output")?;
        let mut vars = BTreeMap::new();
        vars.insert("input".to_string(), input);
        let rendered = render_template(&self.template, &vars)?;
        *self.output.lock().unwrap() = Some(rendered);
        self.base.status.set_finished();
        Ok(())
    }

    fn output(&self) -> Option<String> {
        self.output.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::input::InMemoryInput;

    #[test]
    fn renders_template_against_input_output() {
        let input = InMemoryInput::new("in", "world");
        input.run().unwrap();
        let pipe = TemplatePipe::new("pipe", input, "hello {{input}}");
        pipe.run().unwrap();
        assert_eq!(pipe.output(), Some("hello world".to_string()));
    }

    #[test]
    fn missing_input_output_is_fatal() {
        let input = InMemoryInput::new("in", "unused");
        let pipe = TemplatePipe::new("pipe", input, "hello {{input}}");
        assert!(pipe.run().is_err());
    }
}
