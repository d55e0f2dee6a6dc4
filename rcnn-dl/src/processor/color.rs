//! Random photometric distortions. Boxes pass through unchanged.

use super::{AugmentError, Transform};
use crate::{common::*, label::LabeledBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrightnessContrastInit {
    pub prob: R64,
    /// The maximum additive brightness shift.
    pub brightness: R64,
    /// The maximum relative contrast change.
    pub contrast: R64,
}

impl Default for BrightnessContrastInit {
    fn default() -> Self {
        Self {
            prob: r64(0.2),
            brightness: r64(0.2),
            contrast: r64(0.2),
        }
    }
}

impl BrightnessContrastInit {
    pub fn build(self) -> Result<BrightnessContrast> {
        let Self {
            prob,
            brightness,
            contrast,
        } = self;
        ensure!(
            (0.0..=1.0).contains(&prob.raw()),
            "brightness/contrast probability must be in range [0, 1]"
        );
        ensure!(
            brightness >= 0.0 && contrast >= 0.0,
            "brightness and contrast limits must be non-negative"
        );

        Ok(BrightnessContrast {
            prob: prob.raw(),
            max_brightness: brightness.raw(),
            max_contrast: contrast.raw(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BrightnessContrast {
    prob: f64,
    max_brightness: f64,
    max_contrast: f64,
}

impl Transform for BrightnessContrast {
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        if !rng.gen_bool(self.prob) {
            return Ok((image.shallow_clone(), boxes));
        }

        let alpha = 1.0 + uniform(rng, self.max_contrast);
        let beta = uniform(rng, self.max_brightness);
        let image = tch::no_grad(|| (image * alpha + beta).clamp(0.0, 1.0));

        Ok((image, boxes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorJitterInit {
    pub prob: R64,
    /// The maximum hue rotation as a fraction of a full turn.
    #[serde(default)]
    pub hue_shift: Option<R64>,
    pub saturation_shift: Option<R64>,
    pub value_shift: Option<R64>,
}

impl Default for ColorJitterInit {
    fn default() -> Self {
        Self {
            prob: r64(0.2),
            hue_shift: Some(r64(0.2)),
            saturation_shift: Some(r64(0.2)),
            value_shift: Some(r64(0.2)),
        }
    }
}

impl ColorJitterInit {
    pub fn build(self) -> Result<ColorJitter> {
        let Self {
            prob,
            hue_shift,
            saturation_shift,
            value_shift,
        } = self;
        ensure!(
            (0.0..=1.0).contains(&prob.raw()),
            "color jitter probability must be in range [0, 1]"
        );
        if let Some(shift) = hue_shift {
            ensure!(
                (0.0..=0.5).contains(&shift.raw()),
                "hue shift must be in range [0, 0.5]"
            );
        }

        Ok(ColorJitter {
            prob: prob.raw(),
            max_hue_shift: hue_shift.map(R64::raw),
            max_saturation_shift: saturation_shift.map(R64::raw),
            max_value_shift: value_shift.map(R64::raw),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ColorJitter {
    prob: f64,
    max_hue_shift: Option<f64>,
    max_saturation_shift: Option<f64>,
    max_value_shift: Option<f64>,
}

impl ColorJitter {
    pub fn forward(&self, rgb: &Tensor, rng: &mut StdRng) -> Result<Tensor, AugmentError> {
        tch::no_grad(|| {
            let (channels, _height, _width) = rgb.size3()?;
            if channels != 3 {
                return Err(AugmentError::ChannelMismatch(channels));
            }

            let mut output = rgb.shallow_clone();

            if let Some(max_shift) = self.max_hue_shift {
                let shift = uniform(rng, max_shift);
                let hsv = rgb_to_hsv(&output);
                let hue = (hsv.select(0, 0) + shift + 1.0).fmod(1.0);
                let hsv = Tensor::stack(&[hue, hsv.select(0, 1), hsv.select(0, 2)], 0);
                output = hsv_to_rgb(&hsv).clamp(0.0, 1.0);
            }

            if let Some(max_shift) = self.max_saturation_shift {
                let factor = 1.0 + uniform(rng, max_shift);
                let weights = Tensor::of_slice(&[0.299f32, 0.587, 0.114])
                    .view([3, 1, 1])
                    .to_device(rgb.device());
                let gray = (&output * &weights).sum_dim_intlist(&[0], true, Kind::Float);
                output = (&gray + (&output - &gray) * factor).clamp(0.0, 1.0);
            }

            if let Some(max_shift) = self.max_value_shift {
                let factor = 1.0 + uniform(rng, max_shift);
                output = (output * factor).clamp(0.0, 1.0);
            }

            Ok(output)
        })
    }
}

impl Transform for ColorJitter {
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        if !rng.gen_bool(self.prob) {
            return Ok((image.shallow_clone(), boxes));
        }
        Ok((self.forward(image, rng)?, boxes))
    }
}

/// Converts a `[3, H, W]` RGB image to HSV, all channels in `[0, 1]`.
fn rgb_to_hsv(rgb: &Tensor) -> Tensor {
    let eps = 1e-6;
    let red = rgb.select(0, 0);
    let green = rgb.select(0, 1);
    let blue = rgb.select(0, 2);

    let (max, argmax) = rgb.max_dim(0, false);
    let (min, _) = rgb.min_dim(0, false);
    let diff = &max - &min;
    let safe_diff = diff.clamp_min(eps);

    let saturation = (&diff / max.clamp_min(eps)).where_self(&max.gt(eps), &max.zeros_like());

    let hue = {
        let from_red = (&green - &blue) / &safe_diff;
        let from_green = (&blue - &red) / &safe_diff + 2.0;
        let from_blue = (&red - &green) / &safe_diff + 4.0;
        let hue = from_red.where_self(
            &argmax.eq(0),
            &from_green.where_self(&argmax.eq(1), &from_blue),
        );
        let hue = hue.where_self(&diff.gt(eps), &diff.zeros_like());
        let hue = hue.where_self(&hue.ge(0.0), &(&hue + 6.0));
        hue / 6.0
    };

    Tensor::stack(&[hue, saturation, max], 0)
}

/// Converts a `[3, H, W]` HSV image back to RGB.
fn hsv_to_rgb(hsv: &Tensor) -> Tensor {
    let hue = hsv.select(0, 0) * 6.0;
    let saturation = hsv.select(0, 1);
    let value = hsv.select(0, 2);

    let channel = |n: f64| {
        let k = (&hue + n).fmod(6.0);
        let weight = k.minimum(&(-&k + 4.0)).clamp(0.0, 1.0);
        &value - &value * &saturation * weight
    };

    Tensor::stack(&[channel(5.0), channel(3.0), channel(1.0)], 0)
}

/// Draws from `[-max, max]`.
fn uniform(rng: &mut StdRng, max: f64) -> f64 {
    if max > 0.0 {
        rng.gen_range(-max..=max)
    } else {
        0.0
    }
}
