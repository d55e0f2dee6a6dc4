//! Training program configuration format.

use crate::common::*;

pub use dataset::*;
pub use model::*;
pub use preprocessor::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    pub logging: LoggingConfig,
    pub preprocessor: PreprocessorConfig,
    pub training: TrainingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

mod model {
    use super::*;

    /// The model configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    pub enum ModelConfig {
        /// A TorchScript detector exporting `compute_losses` and `predict` methods.
        TorchScript { file: PathBuf },
    }
}

/// Output directory options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Checkpoints, the category map and metrics are written here.
    pub dir: PathBuf,
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The annotation table.
        pub csv_file: PathBuf,
        /// The directory that image paths in the table are relative to.
        pub data_dir: PathBuf,
        /// The fraction of images used for training.
        #[serde(default = "default_train_ratio")]
        pub train_ratio: R64,
        /// The seed of the train/validation split.
        #[serde(default = "default_split_seed")]
        pub split_seed: u64,
    }

    fn default_train_ratio() -> R64 {
        r64(0.8)
    }

    fn default_split_seed() -> u64 {
        42
    }
}

mod preprocessor {
    use super::*;

    /// Data preprocessing options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PreprocessorConfig {
        #[serde(default = "AugmentationPipelineInit::training")]
        pub train: AugmentationPipelineInit,
        #[serde(default = "AugmentationPipelineInit::validation")]
        pub validation: AugmentationPipelineInit,
        /// The number of loader threads. Samples are built on the training thread if zero.
        #[serde(default)]
        pub num_workers: usize,
        /// The maximum number of waiting batches per loader thread.
        #[serde(default = "default_prefetch")]
        pub prefetch: NonZeroUsize,
    }

    fn default_prefetch() -> NonZeroUsize {
        NonZeroUsize::new(2).unwrap()
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        /// The batch size.
        pub batch_size: NonZeroUsize,
        /// The number of epochs, counted from 1.
        pub epochs: NonZeroUsize,
        /// The seed of shuffling and augmentation.
        #[serde(default)]
        pub seed: u64,
        /// The preferred device. It falls back to CPU if unavailable.
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
        /// If set, CPU is used regardless of `device`.
        #[serde(default)]
        pub force_cpu: bool,
        pub optimizer: OptimizerConfig,
        /// Enables the reduced-precision forward pass on CUDA devices.
        #[serde(default)]
        pub mixed_precision: bool,
        #[serde(default)]
        pub grad_scaler: GradScalerInit,
        /// Checkpoint file loading method.
        pub load_checkpoint: LoadCheckpoint,
    }

    /// The optimizer options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OptimizerConfig {
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        /// The momentum parameter for optimizer.
        pub momentum: R64,
        /// The weight decay parameter for optimizer.
        pub weight_decay: R64,
    }

    /// The learning rate scheduling strategy. Steps are counted in epochs.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Multiply the learning rate by `gamma` every `step_size` epochs.
        StepDecay {
            lr: R64,
            step_size: NonZeroUsize,
            gamma: R64,
        },
        /// Use specific learning rate at specified epochs.
        StepWise { steps: Vec<(usize, R64)> },
    }

    impl LearningRateSchedule {
        /// Replaces the base learning rate.
        pub fn with_base_lr(self, new_lr: R64) -> Result<Self> {
            let schedule = match self {
                Self::Constant { .. } => Self::Constant { lr: new_lr },
                Self::StepDecay {
                    step_size, gamma, ..
                } => Self::StepDecay {
                    lr: new_lr,
                    step_size,
                    gamma,
                },
                Self::StepWise { .. } => {
                    bail!("the base lr cannot be overridden for the step-wise schedule")
                }
            };
            Ok(schedule)
        }
    }

    /// Checkpoint file loading method.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LoadCheckpoint {
        /// Disable checkpoint file loading.
        Disabled,
        /// Load the highest-numbered epoch checkpoint in the output directory.
        FromRecent,
        /// Load the checkpoint file at specified path.
        FromFile { file: PathBuf },
    }
}
