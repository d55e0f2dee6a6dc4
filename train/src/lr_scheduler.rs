use crate::{common::*, config::LearningRateSchedule};

/// Learning rate schedule over epochs.
///
/// The step counts completed epochs, so the first epoch runs at step 0.
#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: R64,
    },
    StepDecay {
        lr_cache: f64,
        step: usize,
        base_lr: f64,
        step_size: usize,
        gamma: f64,
    },
    StepWise {
        lr_cache: f64,
        step: usize,
        index: usize,
        steps: Vec<(usize, R64)>,
    },
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule, init_step: impl Into<Option<usize>>) -> Result<Self> {
        let init_step = init_step.into();

        let mut scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure!(lr >= 0.0, "the lr must be positive");
                Self::Constant { lr }
            }
            LearningRateSchedule::StepDecay {
                lr,
                step_size,
                gamma,
            } => {
                ensure!(lr >= 0.0, "the lr must be positive");
                ensure!(gamma > 0.0, "gamma must be positive");
                Self::StepDecay {
                    lr_cache: lr.raw(),
                    step: 0,
                    base_lr: lr.raw(),
                    step_size: step_size.get(),
                    gamma: gamma.raw(),
                }
            }
            LearningRateSchedule::StepWise { ref steps } => {
                ensure!(
                    !steps.is_empty() && steps[0].0 == 0,
                    "the steps must start from zero"
                );

                steps.iter().fold(Ok(None), |result, (curr_step, lr)| {
                    let prev_step = result?;
                    if let Some(prev_step) = prev_step {
                        ensure!(curr_step > prev_step, "the steps must be monotonic");
                    }
                    ensure!(lr.raw() > 0.0, "lr must be positive");
                    Ok(Some(curr_step))
                })?;

                Self::StepWise {
                    lr_cache: steps[0].1.raw(),
                    step: 0,
                    index: 0,
                    steps: steps.clone(),
                }
            }
        };

        if let Some(init_step) = init_step {
            scheduler.set_step(init_step);
        }

        Ok(scheduler)
    }

    pub fn set_step(&mut self, new_step: usize) {
        match self {
            Self::Constant { .. } => (),
            Self::StepDecay {
                step,
                lr_cache,
                base_lr,
                step_size,
                gamma,
            } => {
                *step = new_step;
                *lr_cache = *base_lr * gamma.powi((new_step / *step_size) as i32);
            }
            Self::StepWise {
                step,
                index,
                steps,
                lr_cache,
            } => {
                *step = new_step;
                let new_index = match steps
                    .binary_search_by_key(&new_step, |(step_thresh, _lr)| *step_thresh)
                {
                    Ok(new_index) => new_index,
                    Err(new_index) => new_index.saturating_sub(1),
                };
                *index = new_index;
                *lr_cache = steps[new_index].1.raw();
            }
        }
    }

    pub fn step(&self) -> Option<usize> {
        match *self {
            Self::Constant { .. } => None,
            Self::StepDecay { step, .. } | Self::StepWise { step, .. } => Some(step),
        }
    }

    /// The learning rate at the current step.
    pub fn lr(&self) -> f64 {
        match self {
            Self::Constant { lr } => lr.raw(),
            Self::StepDecay { lr_cache, .. } | Self::StepWise { lr_cache, .. } => *lr_cache,
        }
    }

    /// Returns the learning rate at the current step and advances by one step.
    pub fn next(&mut self) -> f64 {
        let lr = self.lr();
        if let Some(step) = self.step() {
            self.set_step(step + 1);
        }
        lr
    }
}
