use super::{WH, XYWH, XYXY};
use crate::common::*;

/// The generic axis-aligned rectangle in pixel coordinates.
pub trait Rect {
    type Type;

    fn x1(&self) -> Self::Type;
    fn y1(&self) -> Self::Type;
    fn x2(&self) -> Self::Type;
    fn y2(&self) -> Self::Type;
    fn w(&self) -> Self::Type;
    fn h(&self) -> Self::Type;

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_xywh(xywh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectExt: Rect
where
    Self::Type: Copy + Num + PartialOrd,
{
    fn xyxy(&self) -> [Self::Type; 4] {
        [self.x1(), self.y1(), self.x2(), self.y2()]
    }

    fn xywh(&self) -> [Self::Type; 4] {
        [self.x1(), self.y1(), self.w(), self.h()]
    }

    fn to_xyxy(&self) -> XYXY<Self::Type> {
        XYXY {
            x1: self.x1(),
            y1: self.y1(),
            x2: self.x2(),
            y2: self.y2(),
        }
    }

    fn to_xywh(&self) -> XYWH<Self::Type> {
        XYWH {
            x: self.x1(),
            y: self.y1(),
            w: self.w(),
            h: self.h(),
        }
    }

    fn area(&self) -> Self::Type {
        self.w() * self.h()
    }

    /// Returns true if both extents are strictly positive.
    fn is_positive(&self) -> bool {
        let zero = <Self::Type as num_traits::Zero>::zero();
        self.w() > zero && self.h() > zero
    }

    /// Checks whether the rectangle lies inside `[0, w] x [0, h]`.
    fn is_within(&self, size: &WH<Self::Type>) -> bool {
        let zero = <Self::Type as num_traits::Zero>::zero();
        self.x1() >= zero && self.y1() >= zero && self.x2() <= size.w() && self.y2() <= size.h()
    }

    /// Compute the intersection in XYXY format, or `None` if the rectangles are disjoint.
    fn intersect_with<R>(&self, other: &R) -> Option<XYXY<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let x1 = max(self.x1(), other.x1());
        let y1 = max(self.y1(), other.y1());
        let x2 = min(self.x2(), other.x2());
        let y2 = min(self.y2(), other.y2());

        (x2 > x1 && y2 > y1).then(|| XYXY { x1, y1, x2, y2 })
    }

    fn intersect_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(<Self::Type as num_traits::Zero>::zero)
    }

    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let inter = self.intersect_area_with(other);
        let union = self.area() + other.w() * other.h() - inter;
        if union == <Self::Type as num_traits::Zero>::zero() {
            union
        } else {
            inter / union
        }
    }
}

impl<R> RectExt for R
where
    R: Rect,
    R::Type: Copy + Num + PartialOrd,
{
}

pub(crate) fn max<T: PartialOrd>(lhs: T, rhs: T) -> T {
    if lhs >= rhs {
        lhs
    } else {
        rhs
    }
}

pub(crate) fn min<T: PartialOrd>(lhs: T, rhs: T) -> T {
    if lhs <= rhs {
        lhs
    } else {
        rhs
    }
}

pub(crate) fn clamp<T: PartialOrd>(value: T, lo: T, hi: T) -> T {
    min(max(value, lo), hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rect_intersection() {
        let lhs = XYXY::try_from_xyxy([0.0, 0.0, 10.0, 10.0]).unwrap();
        let rhs = XYXY::try_from_xyxy([5.0, 5.0, 15.0, 15.0]).unwrap();
        let inter = lhs.intersect_with(&rhs).unwrap();
        assert_eq!(inter.xyxy(), [5.0, 5.0, 10.0, 10.0]);
        assert_abs_diff_eq!(lhs.iou_with(&rhs), 25.0 / 175.0);
    }

    #[test]
    fn rect_disjoint() {
        let lhs = XYXY::try_from_xyxy([0.0, 0.0, 10.0, 10.0]).unwrap();
        let rhs = XYXY::try_from_xyxy([10.0, 0.0, 20.0, 10.0]).unwrap();
        assert!(lhs.intersect_with(&rhs).is_none());
        assert_eq!(lhs.iou_with(&rhs), 0.0);
    }
}
