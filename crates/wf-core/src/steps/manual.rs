//! `Manual` (spec supplement, grounded in
//! `original_source/daisy/steps/manual.py`): a step that always requires a
//! human sign-off. It has no automatic way to succeed, so `run()` always
//! fails; paired with `on_failure = Prompt`, the executor's
//! `Step::prompt_user_for_status` a/f/r prompt is the only way past it.

use std::any::Any;

use anyhow::Result;

use crate::step::{Step, StepBase};

pub struct Manual {
    base: StepBase,
    message: String,
}

impl Manual {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { base: StepBase::new(name), message: message.into() })
    }
}

impl Step for Manual {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        anyhow::bail!("{}", self.message)
    }
}
