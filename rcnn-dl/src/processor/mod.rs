//! Data augmentation building blocks.

pub mod blur;
pub mod color;
pub mod error;
pub mod filter;
pub mod flip;
pub mod noise;
pub mod pipeline;

pub use blur::*;
pub use color::*;
pub use error::*;
pub use filter::*;
pub use flip::*;
pub use noise::*;
pub use pipeline::*;
