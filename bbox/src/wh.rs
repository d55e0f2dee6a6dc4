use crate::common::*;

/// Image extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WH<T> {
    w: T,
    h: T,
}

impl<T> WH<T> {
    pub fn try_cast<U>(self) -> Option<WH<U>>
    where
        T: ToPrimitive,
        U: NumCast,
    {
        Some(WH {
            w: U::from(self.w)?,
            h: U::from(self.h)?,
        })
    }
}

impl<T> WH<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_wh(wh: [T; 2]) -> Result<Self> {
        let [w, h] = wh;
        let zero = T::zero();
        ensure!(
            w > zero && h > zero,
            "width and height parameters must be positive"
        );
        Ok(Self { w, h })
    }

    pub fn area(&self) -> T {
        self.w * self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn h(&self) -> T {
        self.h
    }
}
