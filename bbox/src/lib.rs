//! Pixel-unit bounding box types and functions.

mod common;

pub mod rect;
pub use rect::*;

pub mod xyxy;
pub use xyxy::*;

pub mod xywh;
pub use xywh::*;

pub mod wh;
pub use wh::*;

pub mod prelude {
    pub use crate::rect::{Rect, RectExt};
}
