use super::{Sample, Target};
use crate::common::*;

/// Images and targets of one optimizer step, kept as parallel sequences.
///
/// Images may differ in size and targets in object count, nothing is padded.
#[derive(Debug)]
pub struct Batch {
    pub images: Vec<Tensor>,
    pub targets: Vec<Target>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            images: self
                .images
                .iter()
                .map(|image| image.to_device(device))
                .collect(),
            targets: self
                .targets
                .iter()
                .map(|target| target.to_device(device))
                .collect(),
        }
    }
}

/// Packs samples into a batch, preserving their order.
pub fn collate(samples: Vec<Sample>) -> Batch {
    let (images, targets) = samples
        .into_iter()
        .map(|Sample { image, target }| (image, target))
        .unzip();
    Batch { images, targets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabeledBox;

    fn sample(image_id: i64, num_boxes: usize) -> Sample {
        let boxes: Vec<_> = (0..num_boxes)
            .map(|index| {
                let x = index as f32;
                LabeledBox::new(XYXY::try_from_xyxy([x, x, x + 2.0, x + 3.0]).unwrap(), 1)
            })
            .collect();
        Sample {
            image: Tensor::zeros(&[3, 8, 8 + image_id], FLOAT_CPU),
            target: Target::new(image_id, &boxes),
        }
    }

    #[test]
    fn collate_ragged_counts() {
        let batch = collate(vec![sample(0, 0), sample(1, 2), sample(2, 1)]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.targets.len(), 3);
        assert_eq!(batch.targets[0].boxes.size(), vec![0, 4]);
        assert_eq!(batch.targets[1].boxes.size(), vec![2, 4]);
        assert_eq!(batch.targets[2].boxes.size(), vec![1, 4]);

        let ids: Vec<_> = batch.targets.iter().map(|target| target.image_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(batch.images[2].size(), vec![3, 8, 10]);
    }
}
