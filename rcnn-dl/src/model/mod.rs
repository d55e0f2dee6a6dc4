//! The detector interface consumed by training and inference.

mod scripted;
pub use scripted::*;

use crate::{common::*, dataset::Target};

/// A region-based detector with explicit loss and prediction entry points.
pub trait DetectionModel
where
    Self: Send,
{
    /// Computes the named loss terms for a batch.
    ///
    /// `train` selects the mode the forward call runs in. Detectors that only
    /// produce losses in training mode are called with `train = true` during
    /// validation too, under `tch::no_grad`. Implementations restore their
    /// previous mode before returning.
    fn compute_losses(
        &mut self,
        images: &[Tensor],
        targets: &[Target],
        train: bool,
    ) -> Result<LossMap>;

    /// Runs inference, one prediction per image.
    fn predict(&mut self, images: &[Tensor]) -> Result<Vec<Prediction>>;

    fn var_store(&self) -> &nn::VarStore;

    fn var_store_mut(&mut self) -> &mut nn::VarStore;
}

/// Named scalar loss terms in insertion order.
#[derive(Debug, Default)]
pub struct LossMap {
    terms: IndexMap<String, Tensor>,
}

impl LossMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, loss: Tensor) {
        self.terms.insert(name.into(), loss);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.terms.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.terms.iter().map(|(name, loss)| (name.as_str(), loss))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The sum of all terms as a float scalar.
    pub fn total(&self) -> Result<Tensor> {
        self.terms
            .values()
            .map(|loss| loss.to_kind(Kind::Float).sum(Kind::Float))
            .reduce(|lhs, rhs| lhs + rhs)
            .ok_or_else(|| format_err!("the model returned no loss terms"))
    }

    pub fn scalars(&self) -> IndexMap<String, f64> {
        self.terms
            .iter()
            .map(|(name, loss)| (name.clone(), f64::from(loss.sum(Kind::Double))))
            .collect()
    }
}

impl FromIterator<(String, Tensor)> for LossMap {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

/// Detections of one image.
#[derive(Debug, TensorLike)]
pub struct Prediction {
    /// `[N, 4]` corner format in pixels.
    pub boxes: Tensor,
    /// `[N]` category labels.
    pub labels: Tensor,
    /// `[N]` confidence scores.
    pub scores: Tensor,
}

impl Prediction {
    /// Keeps detections with a score strictly above `threshold`.
    pub fn above(&self, threshold: f64) -> Self {
        let keep = self.scores.gt(threshold).nonzero().view([-1]);
        Self {
            boxes: self.boxes.index_select(0, &keep),
            labels: self.labels.index_select(0, &keep),
            scores: self.scores.index_select(0, &keep),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn loss_map_total() -> Result<()> {
        let losses: LossMap = vec![
            ("loss_classifier".to_string(), Tensor::from(0.5f32)),
            ("loss_box_reg".to_string(), Tensor::from(0.25f32)),
        ]
        .into_iter()
        .collect();

        assert_abs_diff_eq!(f64::from(&losses.total()?), 0.75);
        let scalars = losses.scalars();
        assert_eq!(
            scalars.keys().collect::<Vec<_>>(),
            vec!["loss_classifier", "loss_box_reg"]
        );
        assert!(LossMap::new().total().is_err());
        Ok(())
    }

    #[test]
    fn prediction_threshold_is_strict() {
        let prediction = Prediction {
            boxes: Tensor::of_slice(&[0f32, 0., 1., 1., 2., 2., 3., 3., 4., 4., 5., 5.])
                .view([3, 4]),
            labels: Tensor::of_slice(&[1i64, 2, 3]),
            scores: Tensor::of_slice(&[0.9f32, 0.5, 0.2]),
        };

        let kept = prediction.above(0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(Vec::<i64>::from(&kept.labels), vec![1]);
        assert_eq!(kept.boxes.size(), vec![1, 4]);
    }
}
