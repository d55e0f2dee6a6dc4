//! The inference program for region-based detectors.

mod common;
pub mod config;

use crate::{common::*, config::Config};
use rcnn_dl::model::ScriptedDetector;
use train::{checkpoint::Checkpoint, device::select_device};

/// Line width of drawn boxes in pixels.
pub const BOX_THICKNESS: i64 = 2;
/// RGB color of drawn boxes.
pub const BOX_COLOR: [u8; 3] = [0, 255, 0];

/// One detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: XYXY<f32>,
    pub category_name: String,
    pub score: f32,
}

/// Runs a detection model on images and names the detected categories.
pub struct Detector<M>
where
    M: DetectionModel,
{
    model: M,
    categories: CategoryMap,
    device: Device,
}

impl<M> Detector<M>
where
    M: DetectionModel,
{
    pub fn new(model: M, categories: CategoryMap, device: Device) -> Self {
        Self {
            model,
            categories,
            device,
        }
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Detects objects in an image file, keeping scores strictly above `threshold`.
    pub fn predict(&mut self, image_path: impl AsRef<Path>, threshold: f64) -> Result<Vec<Detection>> {
        let image = load_image(image_path.as_ref())?;
        self.predict_image(&image, threshold)
    }

    /// Detects objects in a `[3, H, W]` float image in `[0, 1]`.
    pub fn predict_image(&mut self, image: &Tensor, threshold: f64) -> Result<Vec<Detection>> {
        let image = image.to_device(self.device);
        let prediction = tch::no_grad(|| self.model.predict(&[image]))?
            .into_iter()
            .next()
            .ok_or_else(|| format_err!("the model returned no prediction"))?;
        let Prediction {
            boxes,
            labels,
            scores,
        } = prediction.above(threshold).to_device(Device::Cpu);

        let boxes = Vec::<f32>::from(&boxes.to_kind(Kind::Float).view([-1]));
        let labels = Vec::<i64>::from(&labels.to_kind(Kind::Int64));
        let scores = Vec::<f32>::from(&scores.to_kind(Kind::Float));
        ensure!(
            boxes.len() == labels.len() * 4 && labels.len() == scores.len(),
            "inconsistent prediction sizes, {} box values, {} labels and {} scores",
            boxes.len(),
            labels.len(),
            scores.len()
        );

        let detections = izip!(boxes.chunks(4), labels, scores)
            .filter_map(|(bbox, label, score)| {
                let bbox = match XYXY::try_from_xyxy([bbox[0], bbox[1], bbox[2], bbox[3]]) {
                    Ok(bbox) => bbox,
                    Err(err) => {
                        warn!("skip invalid predicted box {:?}: {}", bbox, err);
                        return None;
                    }
                };
                Some(Detection {
                    bbox,
                    category_name: self.categories.name_or_unknown(label).to_string(),
                    score,
                })
            })
            .collect();
        Ok(detections)
    }
}

/// Draws the detection boxes onto a copy of an image file and saves it.
pub fn visualize(
    image_path: impl AsRef<Path>,
    detections: &[Detection],
    output_path: impl AsRef<Path>,
) -> Result<()> {
    let image_path = image_path.as_ref();
    let output_path = output_path.as_ref();
    let image = vision::image::load(image_path)
        .with_context(|| format!("unable to load image '{}'", image_path.display()))?;
    let canvas = draw_boxes(&image, detections)?;
    vision::image::save(&canvas, output_path)
        .with_context(|| format!("unable to save image '{}'", output_path.display()))?;
    info!("visualization saved to '{}'", output_path.display());
    Ok(())
}

/// Returns a copy of a `[3, H, W]` uint8 image with box outlines drawn.
pub fn draw_boxes(image: &Tensor, detections: &[Detection]) -> Result<Tensor> {
    let (channels, height, width) = image.size3()?;
    ensure!(channels == 3, "expect an RGB image, but get {} channels", channels);
    let canvas = image.to_kind(Kind::Uint8).copy();
    if height == 0 || width == 0 {
        return Ok(canvas);
    }

    let to_pixel = |value: f32, len: i64| (value.round() as i64).clamp(0, len - 1);

    for detection in detections {
        let x1 = to_pixel(detection.bbox.x1(), width);
        let y1 = to_pixel(detection.bbox.y1(), height);
        let x2 = to_pixel(detection.bbox.x2(), width);
        let y2 = to_pixel(detection.bbox.y2(), height);
        let t = BOX_THICKNESS;

        // top, bottom, left, right
        let edges = [
            (y1, (y1 + t).min(y2 + 1), x1, x2 + 1),
            ((y2 + 1 - t).max(y1), y2 + 1, x1, x2 + 1),
            (y1, y2 + 1, x1, (x1 + t).min(x2 + 1)),
            (y1, y2 + 1, (x2 + 1 - t).max(x1), x2 + 1),
        ];

        for (top, bottom, left, right) in edges {
            let region = canvas
                .narrow(1, top, bottom - top)
                .narrow(2, left, right - left);
            for (channel, &value) in BOX_COLOR.iter().enumerate() {
                let _ = region.get(channel as i64).fill_(value as i64);
            }
        }
    }

    Ok(canvas)
}

/// The entry of inference program.
pub async fn start(
    config: Arc<Config>,
    image_path: PathBuf,
    output_path: Option<PathBuf>,
) -> Result<Vec<Detection>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<Detection>> {
        let Config {
            ref model,
            ref categories,
            threshold,
        } = *config;

        let device = select_device(model.device, false);
        let categories = categories.load()?;
        info!(
            "detector initialized with {} categories",
            categories.len()
        );

        let mut detector = {
            let mut model_ = ScriptedDetector::load(&model.file, device)?;
            model_.set_train(false);
            if let Some(weights) = &model.weights {
                Checkpoint::load(weights, device)?.restore(model_.var_store(), None)?;
                info!("loaded weights '{}'", weights.display());
            }
            Detector::new(model_, categories, device)
        };

        let detections = detector.predict(&image_path, threshold.raw())?;
        info!("detected {} objects", detections.len());
        for (index, detection) in detections.iter().enumerate() {
            info!(
                "{}. {} (confidence: {:.3})",
                index + 1,
                detection.category_name,
                detection.score
            );
        }

        if let Some(output_path) = output_path {
            visualize(&image_path, &detections, output_path)?;
        }

        Ok(detections)
    })
    .await?
}
