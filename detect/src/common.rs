pub use anyhow::{ensure, format_err, Context, Result};
pub use bbox::{prelude::*, XYXY};
pub use itertools::izip;
pub use noisy_float::prelude::*;
pub use rcnn_dl::{
    dataset::{load_image, AnnotationStore, CategoryMap},
    model::{DetectionModel, Prediction},
};
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{vision, Device, Kind, Tensor};
pub use tch_tensor_like::TensorLike as _;
pub use tracing::{info, warn};
