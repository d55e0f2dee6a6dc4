//! Boxes paired with their class labels.

use crate::common::*;

/// A corner-format box tagged with a dense category index.
///
/// Keeping the label next to the geometry lets transforms drop or reorder
/// objects without desynchronising boxes and labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub bbox: XYXY<f32>,
    pub label: i64,
}

impl LabeledBox {
    pub fn new(bbox: XYXY<f32>, label: i64) -> Self {
        Self { bbox, label }
    }

    pub fn area(&self) -> f32 {
        self.bbox.area()
    }
}

/// Pairs parallel boxes and labels. Returns `None` if their lengths differ.
pub fn zip_labels(boxes: &[XYXY<f32>], labels: &[i64]) -> Option<Vec<LabeledBox>> {
    (boxes.len() == labels.len()).then(|| {
        boxes
            .iter()
            .zip(labels)
            .map(|(&bbox, &label)| LabeledBox { bbox, label })
            .collect()
    })
}
