//! Random horizontal flip.

use super::{AugmentError, Transform};
use crate::{common::*, label::LabeledBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HorizontalFlipInit {
    pub prob: R64,
}

impl Default for HorizontalFlipInit {
    fn default() -> Self {
        Self { prob: r64(0.5) }
    }
}

impl HorizontalFlipInit {
    pub fn build(self) -> Result<HorizontalFlip> {
        let Self { prob } = self;
        ensure!(
            (0.0..=1.0).contains(&prob.raw()),
            "flip probability must be in range [0, 1]"
        );
        Ok(HorizontalFlip { prob: prob.raw() })
    }
}

#[derive(Debug, Clone)]
pub struct HorizontalFlip {
    prob: f64,
}

impl Transform for HorizontalFlip {
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        if !rng.gen_bool(self.prob) {
            return Ok((image.shallow_clone(), boxes));
        }

        let (_channels, _height, width) = image.size3()?;
        let width = width as f32;
        let image = tch::no_grad(|| image.flip(&[2]));
        let boxes = boxes
            .into_iter()
            .map(|LabeledBox { bbox, label }| LabeledBox {
                bbox: bbox.hflip(width),
                label,
            })
            .collect();

        Ok((image, boxes))
    }
}
