use super::{rect::clamp, Rect, XYWH, WH};
use crate::common::*;

/// Bounding box in corner format, `x2 >= x1` and `y2 >= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XYXY<T> {
    pub(crate) x1: T,
    pub(crate) y1: T,
    pub(crate) x2: T,
    pub(crate) y2: T,
}

impl<T> XYXY<T> {
    pub fn try_cast<V>(self) -> Option<XYXY<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(XYXY {
            x1: V::from(self.x1)?,
            y1: V::from(self.y1)?,
            x2: V::from(self.x2)?,
            y2: V::from(self.y2)?,
        })
    }
}

impl<T> XYXY<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Constrain the corners into `[0, w] x [0, h]`.
    ///
    /// The result may have zero extent.
    pub fn clip(&self, size: &WH<T>) -> Self {
        let zero = T::zero();
        Self {
            x1: clamp(self.x1, zero, size.w()),
            y1: clamp(self.y1, zero, size.h()),
            x2: clamp(self.x2, zero, size.w()),
            y2: clamp(self.y2, zero, size.h()),
        }
    }

    /// Mirror the box along the vertical axis of an image of width `width`.
    pub fn hflip(&self, width: T) -> Self {
        Self {
            x1: width - self.x2,
            y1: self.y1,
            x2: width - self.x1,
            y2: self.y2,
        }
    }
}

impl<T> Rect for XYXY<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        self.x1
    }

    fn y1(&self) -> Self::Type {
        self.y1
    }

    fn x2(&self) -> Self::Type {
        self.x2
    }

    fn y2(&self) -> Self::Type {
        self.y2
    }

    fn w(&self) -> Self::Type {
        self.x2 - self.x1
    }

    fn h(&self) -> Self::Type {
        self.y2 - self.y1
    }

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = xyxy;
        ensure!(x2 >= x1 && y2 >= y1, "x2 >= x1 and y2 >= y1 must hold");
        Ok(Self { x1, y1, x2, y2 })
    }

    fn try_from_xywh(xywh: [Self::Type; 4]) -> Result<Self> {
        let [x, y, w, h] = xywh;
        Self::try_from_xyxy([x, y, x + w, y + h])
    }
}

impl<T> From<XYWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: XYWH<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&XYWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: &XYWH<T>) -> Self {
        let XYWH { x, y, w, h } = *from;
        Self {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
        }
    }
}
