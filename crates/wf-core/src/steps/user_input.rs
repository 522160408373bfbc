//! `UserInput` / `ConsoleInput` (spec §6): presents a prompt through the
//! attached executor's [`crate::executor::Prompter`], re-reading until the
//! answer is a valid choice (auto-detected from any `(x)` in the prompt
//! text when not given explicitly), applying a default on empty input.
//! Grounded in `original_source/daisy/steps/user_input.py`.

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use regex::Regex;

use crate::step::{Step, StepBase};

fn detect_choices(prompt: &str) -> Vec<String> {
    let re = Regex::new(r"\((\w)\)").unwrap();
    re.captures_iter(prompt).map(|c| c[1].to_string().to_lowercase()).collect()
}

/// Prompts the user (through the executor's `Prompter`) and exposes the
/// chosen answer as its `output`.
pub struct ConsoleInput {
    base: StepBase,
    prompt_text: String,
    valid_choices: Option<Vec<String>>,
    default: Option<String>,
    output: Mutex<Option<String>>,
}

impl ConsoleInput {
    pub fn new(
        name: impl Into<String>,
        prompt_text: impl Into<String>,
        valid_choices: Option<Vec<String>>,
        default: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: StepBase::new(name),
            prompt_text: prompt_text.into(),
            valid_choices,
            default,
            output: Mutex::new(None),
        })
    }
}

impl Step for ConsoleInput {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        let choices = self.valid_choices.clone().unwrap_or_else(|| detect_choices(&self.prompt_text));
        let answer = self.prompt_user(&self.prompt_text, &choices, self.default.as_deref())?;
        *self.output.lock().unwrap() = Some(answer);
        self.base.status.set_finished();
        Ok(())
    }

    fn output(&self) -> Option<String> {
        self.output.lock().unwrap().clone()
    }
}
