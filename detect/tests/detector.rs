use anyhow::Result;
use bbox::{prelude::*, XYXY};
use detect::{draw_boxes, visualize, Detection, Detector};
use rcnn_dl::{
    dataset::{CategoryMap, Target},
    model::{DetectionModel, LossMap, Prediction},
};
use tch::{nn, vision, Device, Kind, Tensor};

/// Returns the same predictions for every image.
struct FixedDetector {
    vs: nn::VarStore,
    boxes: Vec<[f32; 4]>,
    labels: Vec<i64>,
    scores: Vec<f32>,
}

impl DetectionModel for FixedDetector {
    fn compute_losses(
        &mut self,
        _images: &[Tensor],
        _targets: &[Target],
        _train: bool,
    ) -> Result<LossMap> {
        Ok(LossMap::new())
    }

    fn predict(&mut self, images: &[Tensor]) -> Result<Vec<Prediction>> {
        let predictions = images
            .iter()
            .map(|_| {
                let coords: Vec<f32> = self.boxes.iter().flatten().copied().collect();
                Prediction {
                    boxes: Tensor::of_slice(&coords).view([-1, 4]),
                    labels: Tensor::of_slice(&self.labels),
                    scores: Tensor::of_slice(&self.scores),
                }
            })
            .collect();
        Ok(predictions)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

fn detector() -> Result<Detector<FixedDetector>> {
    fixed_detector(
        vec![[1.0, 2.0, 6.0, 7.0], [0.0, 0.0, 4.0, 4.0], [3.0, 3.0, 9.0, 9.0]],
        vec![2, 1, 7],
        vec![0.9, 0.5, 0.75],
    )
}

fn fixed_detector(
    boxes: Vec<[f32; 4]>,
    labels: Vec<i64>,
    scores: Vec<f32>,
) -> Result<Detector<FixedDetector>> {
    let categories = CategoryMap::from_names(["glass", "metal"])?;
    let model = FixedDetector {
        vs: nn::VarStore::new(Device::Cpu),
        boxes,
        labels,
        scores,
    };
    Ok(Detector::new(model, categories, Device::Cpu))
}

#[test]
fn predict_filters_and_names() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image_path = dir.path().join("input.png");
    let image = Tensor::zeros(&[3, 12, 12], tch::kind::FLOAT_CPU).to_kind(Kind::Uint8);
    vision::image::save(&image, &image_path)?;

    let mut detector = detector()?;
    let detections = detector.predict(&image_path, 0.5)?;

    // the score equal to the threshold is dropped
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].category_name, "metal");
    assert_eq!(detections[0].bbox.xyxy(), [1.0, 2.0, 6.0, 7.0]);
    assert!((detections[0].score - 0.9).abs() < 1e-6);
    assert_eq!(detections[1].category_name, "Unknown");

    assert!(detector.predict(dir.path().join("missing.png"), 0.5).is_err());
    Ok(())
}

#[test]
fn inverted_box_is_skipped() -> Result<()> {
    let mut detector = fixed_detector(
        vec![[8.0, 2.0, 3.0, 7.0], [1.0, 1.0, 5.0, 5.0]],
        vec![1, 2],
        vec![0.95, 0.8],
    )?;
    let image = Tensor::zeros(&[3, 12, 12], tch::kind::FLOAT_CPU);

    let detections = detector.predict_image(&image, 0.5)?;
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].category_name, "metal");
    assert_eq!(detections[0].bbox.xyxy(), [1.0, 1.0, 5.0, 5.0]);
    Ok(())
}

#[test]
fn draw_two_pixel_outline() -> Result<()> {
    let image = Tensor::zeros(&[3, 10, 10], (Kind::Uint8, Device::Cpu));
    let detection = Detection {
        bbox: XYXY::try_from_xyxy([2.0, 2.0, 7.0, 7.0])?,
        category_name: "glass".to_string(),
        score: 0.8,
    };
    let canvas = draw_boxes(&image, &[detection])?;

    let green = |y: i64, x: i64| {
        let pixel = Vec::<u8>::from(&canvas.narrow(1, y, 1).narrow(2, x, 1).view([-1]));
        pixel == vec![0, 255, 0]
    };
    assert!(green(2, 2));
    assert!(green(3, 5));
    assert!(green(7, 7));
    assert!(green(6, 4));
    assert!(!green(4, 4));
    assert!(!green(1, 1));
    assert!(!green(8, 8));

    // the source image is untouched
    assert_eq!(i64::from(image.sum(Kind::Int64)), 0);
    Ok(())
}

#[test]
fn visualize_writes_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image_path = dir.path().join("input.png");
    let output_path = dir.path().join("output.png");
    let image = Tensor::zeros(&[3, 16, 16], (Kind::Uint8, Device::Cpu));
    vision::image::save(&image, &image_path)?;

    let detection = Detection {
        bbox: XYXY::try_from_xyxy([-3.0, 4.0, 40.0, 9.0])?,
        category_name: "metal".to_string(),
        score: 0.6,
    };
    visualize(&image_path, &[detection], &output_path)?;

    let output = vision::image::load(&output_path)?;
    assert_eq!(output.size(), vec![3, 16, 16]);
    assert!(i64::from(output.sum(Kind::Int64)) > 0);
    Ok(())
}
