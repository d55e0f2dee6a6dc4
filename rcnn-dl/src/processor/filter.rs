//! Box filtering after augmentation.

use crate::{common::*, label::LabeledBox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxFilterInit {
    /// Boxes with clipped area below this value in pixels are dropped.
    pub min_area: R64,
    /// Boxes whose clipped/unclipped area ratio is below this value are dropped.
    pub min_visibility: R64,
    /// Replace surviving boxes by their clipped version.
    pub clip: bool,
}

impl Default for BoxFilterInit {
    fn default() -> Self {
        Self {
            min_area: r64(1.0),
            min_visibility: r64(0.1),
            clip: true,
        }
    }
}

impl BoxFilterInit {
    pub fn build(self) -> Result<BoxFilter> {
        let Self {
            min_area,
            min_visibility,
            clip,
        } = self;
        ensure!(min_area >= 0.0, "min_area must be non-negative");
        ensure!(
            (0.0..=1.0).contains(&min_visibility.raw()),
            "min_visibility must be in range [0, 1]"
        );
        Ok(BoxFilter {
            min_area: min_area.raw() as f32,
            min_visibility: min_visibility.raw() as f32,
            clip,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BoxFilter {
    min_area: f32,
    min_visibility: f32,
    clip: bool,
}

impl BoxFilter {
    /// Drops boxes that are mostly outside the image or too small.
    ///
    /// Kept boxes always have positive extent. Labels travel with their boxes.
    pub fn filter(&self, boxes: Vec<LabeledBox>, size: &WH<f32>) -> Vec<LabeledBox> {
        boxes
            .into_iter()
            .filter_map(|LabeledBox { bbox, label }| {
                let clipped = bbox.clip(size);
                if !clipped.is_positive() {
                    return None;
                }

                let clipped_area = clipped.area();
                if clipped_area < self.min_area {
                    return None;
                }

                let area = bbox.area();
                if area > 0.0 && clipped_area / area < self.min_visibility {
                    return None;
                }

                let bbox = if self.clip { clipped } else { bbox };
                Some(LabeledBox { bbox, label })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(xyxy: [f32; 4], label: i64) -> LabeledBox {
        LabeledBox::new(XYXY::try_from_xyxy(xyxy).unwrap(), label)
    }

    #[test]
    fn filter_drops_and_clips() -> Result<()> {
        let filter = BoxFilterInit::default().build()?;
        let size = WH::try_from_wh([20.0, 20.0])?;
        let boxes = vec![
            labeled([2.0, 2.0, 6.0, 6.0], 1),
            // mostly outside
            labeled([19.5, 0.0, 30.0, 10.0], 2),
            // partially outside, kept and clipped
            labeled([15.0, 15.0, 25.0, 25.0], 3),
            // too small
            labeled([1.0, 1.0, 1.5, 1.5], 4),
            // fully outside
            labeled([21.0, 21.0, 22.0, 22.0], 5),
        ];

        let kept = filter.filter(boxes, &size);
        let labels: Vec<_> = kept.iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![1, 3]);
        assert_eq!(kept[1].bbox.xyxy(), [15.0, 15.0, 20.0, 20.0]);
        assert!(kept.iter().all(|b| b.bbox.is_within(&size)));
        Ok(())
    }
}
