//! Random box-filter blur. Boxes pass through unchanged.

use super::{AugmentError, Transform};
use crate::{common::*, label::LabeledBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlurInit {
    pub prob: R64,
    /// The largest kernel size. Kernel sizes are odd and drawn from `3..=blur_limit`.
    pub blur_limit: usize,
}

impl Default for BlurInit {
    fn default() -> Self {
        Self {
            prob: r64(0.1),
            blur_limit: 3,
        }
    }
}

impl BlurInit {
    pub fn build(self) -> Result<Blur> {
        let Self { prob, blur_limit } = self;
        ensure!(
            (0.0..=1.0).contains(&prob.raw()),
            "blur probability must be in range [0, 1]"
        );
        ensure!(
            blur_limit >= 3,
            "blur_limit must be at least 3, but get {}",
            blur_limit
        );

        let kernel_sizes = (3..=blur_limit as i64).step_by(2).collect();
        Ok(Blur {
            prob: prob.raw(),
            kernel_sizes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Blur {
    prob: f64,
    kernel_sizes: Vec<i64>,
}

impl Blur {
    /// Averages each pixel over a `kernel_size` square window, keeping the image size.
    ///
    /// Pixels outside the image are not counted, so borders do not darken.
    pub fn forward(&self, image: &Tensor, kernel_size: i64) -> Result<Tensor, AugmentError> {
        let (channels, _height, _width) = image.size3()?;
        if channels != 3 {
            return Err(AugmentError::ChannelMismatch(channels));
        }

        let pad = kernel_size / 2;
        let output = tch::no_grad(|| {
            image.unsqueeze(0).f_avg_pool2d(
                &[kernel_size, kernel_size],
                &[1, 1],
                &[pad, pad],
                false,
                false,
                None,
            )
        })?;
        Ok(output.squeeze_dim(0))
    }
}

impl Transform for Blur {
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        if !rng.gen_bool(self.prob) {
            return Ok((image.shallow_clone(), boxes));
        }

        let kernel_size = match self.kernel_sizes.choose(rng) {
            Some(&size) => size,
            None => return Ok((image.shallow_clone(), boxes)),
        };
        Ok((self.forward(image, kernel_size)?, boxes))
    }
}
