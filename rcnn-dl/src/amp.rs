//! Mixed precision: the autocast scope and the dynamic loss scaler.

use crate::{common::*, optim::Sgd};

thread_local! {
    static AUTOCAST: Cell<bool> = Cell::new(false);
}

/// Runs `f` with the reduced-precision scope set to `enabled` on this thread.
///
/// The previous state is restored on return, including on unwinding.
pub fn autocast<T, F>(enabled: bool, f: F) -> T
where
    F: FnOnce() -> T,
{
    struct Restore(bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            AUTOCAST.with(|flag| flag.set(self.0));
        }
    }

    let _restore = Restore(AUTOCAST.with(|flag| flag.replace(enabled)));
    f()
}

pub fn is_autocast_enabled() -> bool {
    AUTOCAST.with(|flag| flag.get())
}

/// The floating point kind models should compute in.
pub fn autocast_kind() -> Kind {
    if is_autocast_enabled() {
        Kind::Half
    } else {
        Kind::Float
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GradScalerInit {
    pub enabled: bool,
    pub init_scale: R64,
    pub growth_factor: R64,
    pub backoff_factor: R64,
    pub growth_interval: NonZeroUsize,
}

impl Default for GradScalerInit {
    fn default() -> Self {
        Self {
            enabled: true,
            init_scale: r64(65536.0),
            growth_factor: r64(2.0),
            backoff_factor: r64(0.5),
            growth_interval: NonZeroUsize::new(2000).unwrap(),
        }
    }
}

impl GradScalerInit {
    pub fn build(self) -> Result<GradScaler> {
        let Self {
            enabled,
            init_scale,
            growth_factor,
            backoff_factor,
            growth_interval,
        } = self;
        ensure!(init_scale > 0.0, "init_scale must be positive");
        ensure!(growth_factor > 1.0, "growth_factor must be greater than 1");
        ensure!(
            backoff_factor > 0.0 && backoff_factor < 1.0,
            "backoff_factor must be in range (0, 1)"
        );

        Ok(GradScaler {
            enabled,
            scale: init_scale.raw(),
            growth_factor: growth_factor.raw(),
            backoff_factor: backoff_factor.raw(),
            growth_interval: growth_interval.get(),
            growth_tracker: 0,
            stage: Stage::Idle,
        })
    }
}

/// The result of a gated optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Applied,
    /// Non-finite gradients were found, the parameters are unchanged.
    Skipped { scale: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Scaled,
    Unscaled { found_inf: bool },
    Stepped { found_inf: bool },
}

/// Dynamic loss scaling.
///
/// Each step must go through `scale`, backward, `unscale_and_check`, `step` and
/// `update` in this order. Calls out of order are errors.
#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    growth_tracker: usize,
    stage: Stage,
}

impl GradScaler {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale
    }

    pub fn scale(&mut self, loss: &Tensor) -> Result<Tensor> {
        ensure!(
            self.stage == Stage::Idle,
            "scale() called before the previous step was updated"
        );
        self.stage = Stage::Scaled;

        if self.enabled {
            Ok(loss.to_kind(Kind::Float) * self.scale)
        } else {
            Ok(loss.shallow_clone())
        }
    }

    /// Divides the gradients by the scale and reports whether any is non-finite.
    pub fn unscale_and_check(&mut self, optimizer: &Sgd) -> Result<bool> {
        ensure!(
            self.stage == Stage::Scaled,
            "unscale_and_check() must follow scale()"
        );

        let found_inf = if self.enabled {
            let inv_scale = 1.0 / self.scale;
            tch::no_grad(|| {
                optimizer
                    .params()
                    .map(|param| param.grad())
                    .filter(|grad| grad.defined())
                    .fold(false, |found_inf, mut grad| {
                        let unscaled = &grad * inv_scale;
                        grad.copy_(&unscaled);
                        found_inf || !bool::from(grad.isfinite().all())
                    })
            })
        } else {
            false
        };

        self.stage = Stage::Unscaled { found_inf };
        Ok(found_inf)
    }

    /// Steps the optimizer unless non-finite gradients were found.
    pub fn step(&mut self, optimizer: &mut Sgd) -> Result<StepOutcome> {
        let found_inf = match self.stage {
            Stage::Unscaled { found_inf } => found_inf,
            _ => bail!("step() must follow unscale_and_check()"),
        };

        let outcome = if found_inf {
            StepOutcome::Skipped { scale: self.scale }
        } else {
            optimizer.step();
            StepOutcome::Applied
        };

        self.stage = Stage::Stepped { found_inf };
        Ok(outcome)
    }

    /// Adjusts the scale for the next step.
    pub fn update(&mut self) -> Result<()> {
        let found_inf = match self.stage {
            Stage::Stepped { found_inf } => found_inf,
            _ => bail!("update() must follow step()"),
        };

        if self.enabled {
            if found_inf {
                self.scale *= self.backoff_factor;
                self.growth_tracker = 0;
            } else {
                self.growth_tracker += 1;
                if self.growth_tracker == self.growth_interval {
                    self.scale *= self.growth_factor;
                    self.growth_tracker = 0;
                }
            }
        }

        self.stage = Stage::Idle;
        Ok(())
    }
}
