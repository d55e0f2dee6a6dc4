use crate::common::*;
use thiserror::Error;

/// Failures that indicate a corrupt or unreachable dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("malformed annotation data in '{path}': {msg}")]
    DataFormat { path: PathBuf, msg: String },
    #[error("unable to read '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to decode image '{path}'")]
    Image {
        path: PathBuf,
        #[source]
        source: TchError,
    },
}

impl DatasetError {
    pub fn data_format(path: impl AsRef<Path>, msg: impl ToString) -> Self {
        Self::DataFormat {
            path: path.as_ref().to_owned(),
            msg: msg.to_string(),
        }
    }
}
