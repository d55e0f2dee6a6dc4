use super::{AnnotationStore, DatasetError, ImageRecord};
use crate::{common::*, label::LabeledBox, processor::AugmentationPipeline};

/// The per-image detection target.
#[derive(Debug, TensorLike)]
pub struct Target {
    #[tensor_like(clone)]
    pub image_id: i64,
    /// Boxes in `[N, 4]` corner format, absolute pixels.
    pub boxes: Tensor,
    /// Category labels in `[N]`.
    pub labels: Tensor,
    /// Box areas in `[N]`, always computed from `boxes`.
    pub area: Tensor,
    /// All zeros, `[N]`.
    pub iscrowd: Tensor,
}

impl Target {
    pub fn new(image_id: i64, boxes: &[LabeledBox]) -> Self {
        let num_boxes = boxes.len() as i64;

        let (boxes, labels, area) = if boxes.is_empty() {
            (
                Tensor::zeros(&[0, 4], FLOAT_CPU),
                Tensor::zeros(&[0], INT64_CPU),
                Tensor::zeros(&[0], FLOAT_CPU),
            )
        } else {
            let coords: Vec<f32> = boxes.iter().flat_map(|b| b.bbox.xyxy()).collect();
            let labels: Vec<i64> = boxes.iter().map(|b| b.label).collect();
            let area: Vec<f32> = boxes.iter().map(|b| b.area()).collect();
            (
                Tensor::of_slice(&coords).view([num_boxes, 4]),
                Tensor::of_slice(&labels),
                Tensor::of_slice(&area),
            )
        };

        Self {
            image_id,
            boxes,
            labels,
            area,
            iscrowd: Tensor::zeros(&[num_boxes], INT64_CPU),
        }
    }

    pub fn num_objects(&self) -> i64 {
        self.boxes.size()[0]
    }
}

/// One image with its target.
#[derive(Debug)]
pub struct Sample {
    /// `[3, H, W]` float pixels in `[0, 1]`.
    pub image: Tensor,
    pub target: Target,
}

/// Builds samples from the annotation store.
///
/// The builder reads the store only, so it can be shared across loader workers.
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    store: Arc<AnnotationStore>,
    pipeline: Option<Arc<AugmentationPipeline>>,
    seed: u64,
}

impl SampleBuilder {
    pub fn new(
        store: Arc<AnnotationStore>,
        pipeline: Option<AugmentationPipeline>,
        seed: u64,
    ) -> Self {
        Self {
            store,
            pipeline: pipeline.map(Arc::new),
            seed,
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Builds the sample at a position of the ascending image index.
    pub fn build_nth(&self, index: usize, epoch: usize) -> Result<Sample> {
        let record = self.store.record(index).ok_or_else(|| {
            format_err!(
                "sample index {} out of range, the dataset has {} images",
                index,
                self.store.len()
            )
        })?;
        self.build_record(record, epoch)
    }

    pub fn build(&self, image_id: i64, epoch: usize) -> Result<Sample> {
        let record = self
            .store
            .find(image_id)
            .ok_or_else(|| format_err!("image id {} is not in the annotation table", image_id))?;
        self.build_record(record, epoch)
    }

    fn build_record(&self, record: &ImageRecord, epoch: usize) -> Result<Sample> {
        let image_id = record.image_id;
        let image = load_image(&self.store.image_path(record))?;
        let boxes = self.clipped_boxes(record)?;

        let (image, boxes) = match &self.pipeline {
            Some(pipeline) => {
                let mut rng = sample_rng(self.seed, epoch, image_id);
                match pipeline.apply(&image, boxes.clone(), &mut rng) {
                    Ok(output) => output,
                    Err(err) if err.is_recoverable() => {
                        warn!(
                            "augmentation failed for image {}, using the plain image: {}",
                            image_id, err
                        );
                        (image, boxes)
                    }
                    Err(err) => {
                        return Err(Error::from(err))
                            .with_context(|| format!("unable to augment image {}", image_id))
                    }
                }
            }
            None => (image, boxes),
        };

        Ok(Sample {
            image,
            target: Target::new(image_id, &boxes),
        })
    }

    /// Converts table rows to boxes clipped by the declared image size, dropping
    /// boxes that end up with zero extent.
    fn clipped_boxes(&self, record: &ImageRecord) -> Result<Vec<LabeledBox>> {
        let categories = self.store.categories();

        record
            .rows
            .iter()
            .filter_map(|row| {
                let bbox = row.xywh().clip_to(&record.size)?;
                let label = categories.name_to_idx(&row.category_name).ok_or_else(|| {
                    format_err!(
                        "category '{}' of image {} is not registered",
                        row.category_name,
                        record.image_id
                    )
                });
                Some(label.map(|label| LabeledBox::new(bbox, label)))
            })
            .try_collect()
    }
}

/// Loads an image file as `[3, H, W]` float pixels in `[0, 1]`.
pub fn load_image(path: &Path) -> Result<Tensor> {
    if !path.is_file() {
        return Err(DatasetError::Io {
            path: path.to_owned(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "the image file does not exist",
            ),
        }
        .into());
    }

    let image = vision::image::load(path).map_err(|source| DatasetError::Image {
        path: path.to_owned(),
        source,
    })?;
    Ok(image.to_kind(Kind::Float) / 255.0)
}

/// The augmentation RNG of one image in one epoch.
fn sample_rng(seed: u64, epoch: usize, image_id: i64) -> StdRng {
    let seed = seed
        ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (image_id as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    StdRng::seed_from_u64(seed)
}
