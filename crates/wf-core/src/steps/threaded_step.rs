//! `ThreadedStep` (spec §5's example of a step that "spawns its own worker
//! and exposes progress through the polling callback"), grounded in
//! `original_source/daisychain/threaded_step.py`. Runs a closure on a
//! dedicated `std::thread` and observes its outcome non-blockingly through
//! a shared slot rather than joining the thread from `check_status`.

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::step::{Step, StepBase};

type Work = Box<dyn FnOnce() -> Result<()> + Send>;

pub struct ThreadedStep {
    base: StepBase,
    work: Mutex<Option<Work>>,
    result: Arc<Mutex<Option<Result<()>>>>,
}

impl ThreadedStep {
    pub fn new(name: impl Into<String>, work: impl FnOnce() -> Result<()> + Send + 'static) -> Arc<Self> {
        Arc::new(Self { base: StepBase::new(name), work: Mutex::new(Some(Box::new(work))), result: Arc::new(Mutex::new(None)) })
    }
}

impl Step for ThreadedStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self) -> Result<()> {
        let work = self.work.lock().unwrap().take().ok_or_else(|| anyhow::anyhow!("step already started"))?;
        let slot = self.result.clone();
        std::thread::spawn(move || {
            let outcome = work();
            *slot.lock().unwrap() = Some(outcome);
        });
        self.base.status.set_running();
        Ok(())
    }

    fn check_status(&self) -> Result<()> {
        let outcome = self.result.lock().unwrap().take();
        if let Some(outcome) = outcome {
            match outcome {
                Ok(()) => self.base.status.set_finished(),
                Err(e) => self.base.status.set_failed(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn successful_worker_finishes_the_step() {
        let step = ThreadedStep::new("work", || Ok(()));
        step.run().unwrap();
        assert!(step.status().running());
        let mut tries = 0;
        loop {
            step.check_status().unwrap();
            if step.status().finished() || tries > 100 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
            tries += 1;
        }
        assert!(step.status().finished());
    }

    #[test]
    fn failing_worker_fails_the_step() {
        let step = ThreadedStep::new("work", || anyhow::bail!("worker exploded"));
        step.run().unwrap();
        let mut tries = 0;
        loop {
            step.check_status().unwrap();
            if step.status().failed() || tries > 100 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
            tries += 1;
        }
        assert!(step.status().failed());
    }

    #[test]
    fn running_twice_is_rejected() {
        let step = ThreadedStep::new("work", || Ok(()));
        step.run().unwrap();
        assert!(step.run().is_err());
    }
}
