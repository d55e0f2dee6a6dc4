//! The building blocks of a region-based detector training pipeline.

mod common;
pub mod amp;
pub mod dataset;
pub mod label;
pub mod model;
pub mod optim;
pub mod processor;
