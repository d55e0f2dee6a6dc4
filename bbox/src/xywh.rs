use super::{rect::clamp, WH, XYXY};
use crate::common::*;

/// Bounding box given by its top-left corner and extent, as written in annotation tables.
///
/// The extent is not validated, so rows with negative width or height can be represented
/// and rejected later by [XYWH::clip_to].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XYWH<T> {
    pub x: T,
    pub y: T,
    pub w: T,
    pub h: T,
}

impl<T> XYWH<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn new(x: T, y: T, w: T, h: T) -> Self {
        Self { x, y, w, h }
    }

    /// Converts to corners, clips each coordinate into `[0, w] x [0, h]` and keeps the box
    /// only if it still has positive extent.
    pub fn clip_to(&self, size: &WH<T>) -> Option<XYXY<T>> {
        let zero = T::zero();
        let Self { x, y, w, h } = *self;

        let x1 = clamp(x, zero, size.w());
        let y1 = clamp(y, zero, size.h());
        let x2 = clamp(x + w, zero, size.w());
        let y2 = clamp(y + h, zero, size.h());

        (x2 > x1 && y2 > y1).then(|| XYXY { x1, y1, x2, y2 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectExt;

    fn image() -> WH<f32> {
        WH::try_from_wh([20.0, 20.0]).unwrap()
    }

    #[test]
    fn clip_inside() {
        let bbox = XYWH::new(10.0, 10.0, 5.0, 5.0).clip_to(&image()).unwrap();
        assert_eq!(bbox.xyxy(), [10.0, 10.0, 15.0, 15.0]);
        assert_eq!(bbox.area(), 25.0);
    }

    #[test]
    fn clip_overflowing() {
        let bbox = XYWH::new(18.0, 18.0, 10.0, 10.0)
            .clip_to(&image())
            .unwrap();
        assert_eq!(bbox.xyxy(), [18.0, 18.0, 20.0, 20.0]);
        assert_eq!(bbox.area(), 4.0);
    }

    #[test]
    fn clip_outside_is_dropped() {
        assert!(XYWH::new(25.0, 0.0, 5.0, 5.0).clip_to(&image()).is_none());
    }

    #[test]
    fn clip_negative_extent_is_dropped() {
        assert!(XYWH::new(5.0, 5.0, -3.0, 4.0).clip_to(&image()).is_none());
        assert!(XYWH::new(5.0, 5.0, 0.0, 4.0).clip_to(&image()).is_none());
    }

    #[test]
    fn clip_negative_origin() {
        let bbox = XYWH::new(-4.0, -2.0, 6.0, 6.0).clip_to(&image()).unwrap();
        assert_eq!(bbox.xyxy(), [0.0, 0.0, 2.0, 4.0]);
    }
}
