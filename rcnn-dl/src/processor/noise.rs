//! Additive gaussian pixel noise.

use super::{AugmentError, Transform};
use crate::{common::*, label::LabeledBox};
use rand_distr::Normal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GaussianNoiseInit {
    pub prob: R64,
    /// The standard deviation on the `[0, 1]` pixel scale.
    pub std: R64,
}

impl Default for GaussianNoiseInit {
    fn default() -> Self {
        Self {
            prob: r64(0.1),
            std: r64(0.025),
        }
    }
}

impl GaussianNoiseInit {
    pub fn build(self) -> Result<GaussianNoise> {
        let Self { prob, std } = self;
        ensure!(
            (0.0..=1.0).contains(&prob.raw()),
            "noise probability must be in range [0, 1]"
        );
        ensure!(std >= 0.0, "noise std must be non-negative");
        let normal = Normal::new(0.0, std.raw())?;
        Ok(GaussianNoise {
            prob: prob.raw(),
            normal,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GaussianNoise {
    prob: f64,
    normal: Normal<f64>,
}

impl Transform for GaussianNoise {
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        if !rng.gen_bool(self.prob) {
            return Ok((image.shallow_clone(), boxes));
        }

        // draw from the sample RNG, not the global torch generator
        let numel = image.numel();
        let noise: Vec<f32> = iter::repeat_with(|| rng.sample(self.normal) as f32)
            .take(numel)
            .collect();
        let noise = Tensor::of_slice(&noise)
            .view(image.size().as_slice())
            .to_device(image.device());
        let image = tch::no_grad(|| (image + noise).clamp(0.0, 1.0));

        Ok((image, boxes))
    }
}
