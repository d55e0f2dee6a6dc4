//! Dataset processing toolkit.

mod annotation;
mod batch;
mod category;
mod error;
mod loader;
mod sample;
mod split;

pub use annotation::*;
pub use batch::*;
pub use category::*;
pub use error::*;
pub use loader::*;
pub use sample::*;
pub use split::*;
