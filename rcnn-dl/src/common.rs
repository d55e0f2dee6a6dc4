pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, WH, XYWH, XYXY};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use log::{error, info, warn};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cell::Cell,
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    io::Read,
    iter::{self, FromIterator},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
pub use tch::{
    kind::{FLOAT_CPU, INT64_CPU},
    nn, vision, Device, Kind, TchError, Tensor,
};
pub use tch_tensor_like::TensorLike;
