//! The augmentation pipeline applied by the sample builder.

use super::{
    AugmentError, BlurInit, BoxFilter, BoxFilterInit, BrightnessContrastInit, ColorJitterInit,
    GaussianNoiseInit, HorizontalFlipInit,
};
use crate::{
    common::*,
    label::{zip_labels, LabeledBox},
};

/// An image transform that keeps boxes in sync with the pixels.
///
/// The returned box set may be reordered or smaller than the input.
pub trait Transform
where
    Self: Debug + Send + Sync,
{
    fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AugmentationPipelineInit {
    #[serde(default)]
    pub horizontal_flip: Option<HorizontalFlipInit>,
    #[serde(default)]
    pub brightness_contrast: Option<BrightnessContrastInit>,
    #[serde(default)]
    pub color_jitter: Option<ColorJitterInit>,
    #[serde(default)]
    pub gaussian_noise: Option<GaussianNoiseInit>,
    #[serde(default)]
    pub blur: Option<BlurInit>,
    #[serde(default)]
    pub filter: BoxFilterInit,
}

impl AugmentationPipelineInit {
    /// The stochastic stack used on training samples.
    pub fn training() -> Self {
        Self {
            horizontal_flip: Some(Default::default()),
            brightness_contrast: Some(Default::default()),
            color_jitter: Some(Default::default()),
            gaussian_noise: Some(Default::default()),
            blur: Some(Default::default()),
            filter: Default::default(),
        }
    }

    /// No transforms, only box filtering.
    pub fn validation() -> Self {
        Self {
            horizontal_flip: None,
            brightness_contrast: None,
            color_jitter: None,
            gaussian_noise: None,
            blur: None,
            filter: Default::default(),
        }
    }

    pub fn build(self) -> Result<AugmentationPipeline> {
        let Self {
            horizontal_flip,
            brightness_contrast,
            color_jitter,
            gaussian_noise,
            blur,
            filter,
        } = self;

        let mut transforms: Vec<Box<dyn Transform>> = vec![];
        if let Some(init) = horizontal_flip {
            transforms.push(Box::new(init.build()?));
        }
        if let Some(init) = brightness_contrast {
            transforms.push(Box::new(init.build()?));
        }
        if let Some(init) = color_jitter {
            transforms.push(Box::new(init.build()?));
        }
        if let Some(init) = gaussian_noise {
            transforms.push(Box::new(init.build()?));
        }
        if let Some(init) = blur {
            transforms.push(Box::new(init.build()?));
        }

        Ok(AugmentationPipeline {
            transforms,
            filter: filter.build()?,
        })
    }
}

#[derive(Debug)]
pub struct AugmentationPipeline {
    transforms: Vec<Box<dyn Transform>>,
    filter: BoxFilter,
}

impl AugmentationPipeline {
    pub fn new(transforms: Vec<Box<dyn Transform>>, filter: BoxFilter) -> Self {
        Self { transforms, filter }
    }

    /// Runs all transforms in order, then filters the boxes by the output image extent.
    pub fn apply(
        &self,
        image: &Tensor,
        boxes: Vec<LabeledBox>,
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<LabeledBox>), AugmentError> {
        let (channels, _height, _width) = image.size3()?;
        if channels != 3 {
            return Err(AugmentError::ChannelMismatch(channels));
        }
        if let Some(bad) = boxes.iter().find(|b| !b.bbox.is_positive()) {
            return Err(AugmentError::DegenerateBox(bad.bbox.xyxy()));
        }

        let (image, boxes) = self.transforms.iter().try_fold(
            (image.shallow_clone(), boxes),
            |(image, boxes), transform| transform.apply(&image, boxes, rng),
        )?;

        let (_channels, height, width) = image.size3()?;
        let size = WH::try_from_wh([width as f32, height as f32]).map_err(|_| {
            TchError::Shape(format!("empty image of size {}x{}", width, height))
        })?;
        let boxes = self.filter.filter(boxes, &size);

        Ok((image, boxes))
    }

    /// Like [AugmentationPipeline::apply] but with boxes and labels as parallel sequences.
    pub fn apply_parallel(
        &self,
        image: &Tensor,
        boxes: &[XYXY<f32>],
        labels: &[i64],
        rng: &mut StdRng,
    ) -> Result<(Tensor, Vec<XYXY<f32>>, Vec<i64>), AugmentError> {
        let labeled = zip_labels(boxes, labels).ok_or(AugmentError::LengthMismatch {
            boxes: boxes.len(),
            labels: labels.len(),
        })?;
        let (image, labeled) = self.apply(image, labeled, rng)?;
        let (boxes, labels) = labeled
            .into_iter()
            .map(|LabeledBox { bbox, label }| (bbox, label))
            .unzip();
        Ok((image, boxes, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_keeps_labels_in_sync() -> Result<()> {
        let pipeline = AugmentationPipelineInit::training().build()?;
        let image = Tensor::rand(&[3, 20, 20], FLOAT_CPU);
        let boxes = [
            XYXY::try_from_xyxy([1.0, 1.0, 6.0, 4.0])?,
            XYXY::try_from_xyxy([10.0, 2.0, 19.0, 18.0])?,
            XYXY::try_from_xyxy([3.0, 12.0, 5.0, 16.0])?,
        ];
        let labels = [1, 2, 3];

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (output, out_boxes, out_labels) =
                pipeline.apply_parallel(&image, &boxes, &labels, &mut rng)?;

            assert_eq!(output.size(), vec![3, 20, 20]);
            assert_eq!(out_boxes.len(), out_labels.len());
            for (bbox, label) in out_boxes.iter().zip(&out_labels) {
                let width = boxes[*label as usize - 1].w();
                assert_eq!(bbox.w(), width);
                assert!(bbox.is_positive());
            }
        }
        Ok(())
    }

    #[test]
    fn pipeline_length_mismatch_is_fatal() -> Result<()> {
        let pipeline = AugmentationPipelineInit::validation().build()?;
        let image = Tensor::rand(&[3, 8, 8], FLOAT_CPU);
        let boxes = [XYXY::try_from_xyxy([1.0, 1.0, 2.0, 2.0])?];
        let mut rng = StdRng::seed_from_u64(0);

        let err = pipeline
            .apply_parallel(&image, &boxes, &[1, 2], &mut rng)
            .unwrap_err();
        assert!(!err.is_recoverable());
        Ok(())
    }

    #[test]
    fn pipeline_runs_on_empty_boxes() -> Result<()> {
        let pipeline = AugmentationPipelineInit::training().build()?;
        let image = Tensor::rand(&[3, 8, 8], FLOAT_CPU);
        let mut rng = StdRng::seed_from_u64(0);

        let (output, boxes) = pipeline.apply(&image, vec![], &mut rng)?;
        assert_eq!(output.size(), vec![3, 8, 8]);
        assert!(boxes.is_empty());
        Ok(())
    }
}
