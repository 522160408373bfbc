//! `Wait` (spec supplement, grounded in
//! `original_source/daisychain/steps/wait.py`): a step that simply waits
//! out a fixed duration, polling elapsed time on `check_status` rather
//! than blocking `run()`.

use std::any::Any;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::step::{Step, StepBase};

pub struct Wait {
    base: StepBase,
    duration: Duration,
    started: Mutex<Option<Instant>>,
}

impl Wait {
    pub fn new(name: impl Into<String>, duration: Duration) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { base: StepBase::new(name), duration, started: Mutex::new(None) })
    }
}

impl Step for Wait {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        *self.started.lock().unwrap() = Some(Instant::now());
        self.base.status.set_running();
        Ok(())
    }

    fn check_status(&self) -> Result<()> {
        if let Some(started) = *self.started.lock().unwrap() {
            if started.elapsed() >= self.duration {
                self.base.status.set_finished();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishes_once_the_duration_has_elapsed() {
        let step = Wait::new("pause", Duration::from_millis(5));
        step.run().unwrap();
        step.check_status().unwrap();
        assert!(step.status().running());
        std::thread::sleep(Duration::from_millis(10));
        step.check_status().unwrap();
        assert!(step.status().finished());
    }
}
