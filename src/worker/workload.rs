use std::{thread, time::Duration};

use thiserror::Error;

use crate::models::task::TaskParams;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload failed: {0}")]
    Failed(String),
}

/// The computation a worker runs for one task. `progress` receives the
/// current iteration after every step.
pub trait Workload: Send + Sync {
    fn run(&self, params: &TaskParams, progress: &mut dyn FnMut(u64)) -> Result<f64, WorkloadError>;
}

/// Sums `element_amount` terms starting at `first_element`, stepping by `delta`
/// and pausing `interval` seconds after each step.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticProgression;

impl Workload for ArithmeticProgression {
    fn run(&self, params: &TaskParams, progress: &mut dyn FnMut(u64)) -> Result<f64, WorkloadError> {
        let steps = u64::try_from(params.element_amount).unwrap_or(0);
        let pause = params.interval_duration();

        let mut current = params.first_element;
        let mut result = current;
        for iteration in 1..steps {
            progress(iteration);
            current += params.delta;
            result += current;
            pause_for(pause);
        }
        Ok(result)
    }
}

fn pause_for(pause: Duration) {
    if !pause.is_zero() {
        thread::sleep(pause);
    }
}
