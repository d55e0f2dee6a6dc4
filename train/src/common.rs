//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Result};
pub use indexmap::IndexMap;
pub use itertools::Itertools;
pub use noisy_float::prelude::*;
pub use once_cell::sync::Lazy;
pub use rcnn_dl::{
    amp::{autocast, GradScaler, GradScalerInit, StepOutcome},
    dataset::{split_indices, AnnotationStore, Batch, DataLoader, DataLoaderInit, SampleBuilder},
    model::DetectionModel,
    optim::{Sgd, SgdInit, SgdState},
    processor::AugmentationPipelineInit,
};
pub use regex::Regex;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::BTreeMap,
    fs,
    io::Write as _,
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
pub use tch::{nn, Device, Tensor};
pub use tracing::{debug, info, warn};
