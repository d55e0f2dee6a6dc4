use crate::common::*;

pub use categories::*;
pub use model::*;

/// The inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub categories: CategorySource,
    /// Detections with a score at or below this value are discarded.
    #[serde(default = "default_threshold")]
    pub threshold: R64,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

fn default_threshold() -> R64 {
    r64(0.5)
}

mod model {
    use super::*;

    /// Model configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// The TorchScript detector.
        pub file: PathBuf,
        /// Optional checkpoint whose parameters replace the ones in `file`.
        #[serde(default)]
        pub weights: Option<PathBuf>,
        /// The preferred device. It falls back to CPU if unavailable.
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
    }
}

mod categories {
    use super::*;

    /// Where the label to category name mapping comes from.
    ///
    /// It must be the mapping the model was trained with.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum CategorySource {
        /// A category map saved by the training program.
        Map { file: PathBuf },
        /// Rebuild the map from the annotation table used for training.
        Table { csv_file: PathBuf },
    }

    impl CategorySource {
        pub fn load(&self) -> Result<CategoryMap> {
            let categories = match self {
                Self::Map { file } => CategoryMap::load(file)?,
                Self::Table { csv_file } => {
                    let data_dir = csv_file.parent().unwrap_or_else(|| Path::new(""));
                    AnnotationStore::load(csv_file, data_dir)?.categories().clone()
                }
            };
            Ok(categories)
        }
    }
}
