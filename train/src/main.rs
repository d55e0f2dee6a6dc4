use anyhow::{Context, Result};
use noisy_float::prelude::*;
use std::{
    env,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use structopt::StructOpt;
use tracing::{info_span, warn, Instrument};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};
use train::config::{Config, LoadCheckpoint};

#[derive(Debug, Clone, StructOpt)]
/// Train a region-based detector
struct Args {
    #[structopt(long, default_value = "train.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(long)]
    /// annotation table, overrides dataset.csv_file
    pub csv_file: Option<PathBuf>,
    #[structopt(long)]
    /// image directory, overrides dataset.data_dir
    pub data_dir: Option<PathBuf>,
    #[structopt(long)]
    /// checkpoint and log directory, overrides logging.dir
    pub output_dir: Option<PathBuf>,
    #[structopt(long)]
    pub batch_size: Option<NonZeroUsize>,
    #[structopt(long)]
    pub epochs: Option<NonZeroUsize>,
    #[structopt(long)]
    /// base learning rate
    pub lr: Option<f64>,
    #[structopt(long)]
    pub num_workers: Option<usize>,
    #[structopt(long)]
    /// checkpoint file to resume from, or "latest" for the newest one in the output directory
    pub resume: Option<String>,
    #[structopt(long)]
    /// enable mixed precision training
    pub use_amp: bool,
    #[structopt(long)]
    /// train on CPU even if CUDA is available
    pub force_cpu: bool,
}

impl Args {
    fn apply(self, config: &mut Config) -> Result<()> {
        let Args {
            csv_file,
            data_dir,
            output_dir,
            batch_size,
            epochs,
            lr,
            num_workers,
            resume,
            use_amp,
            force_cpu,
            ..
        } = self;

        if let Some(csv_file) = csv_file {
            config.dataset.csv_file = csv_file;
        }
        if let Some(data_dir) = data_dir {
            config.dataset.data_dir = data_dir;
        }
        if let Some(output_dir) = output_dir {
            config.logging.dir = output_dir;
        }
        if let Some(batch_size) = batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(epochs) = epochs {
            config.training.epochs = epochs;
        }
        if let Some(lr) = lr {
            let lr = R64::try_new(lr).context("the learning rate must be finite")?;
            config.training.optimizer.lr_schedule =
                config.training.optimizer.lr_schedule.clone().with_base_lr(lr)?;
        }
        if let Some(num_workers) = num_workers {
            config.preprocessor.num_workers = num_workers;
        }
        if let Some(resume) = resume {
            config.training.load_checkpoint = match resume.as_str() {
                "latest" => LoadCheckpoint::FromRecent,
                _ => LoadCheckpoint::FromFile {
                    file: PathBuf::from(resume),
                },
            };
        }
        config.training.mixed_precision |= use_amp;
        config.training.force_cpu |= force_cpu;

        Ok(())
    }
}

#[tokio::main]
pub async fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let args = Args::from_args();
    let config = {
        let mut config = Config::open(&args.config_file).with_context(|| {
            format!(
                "failed to load config file '{}'",
                args.config_file.display()
            )
        })?;
        args.apply(&mut config)?;
        Arc::new(config)
    };

    // stop at the next batch boundary on Ctrl-C
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current batch");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    // start training program
    train::start(config, stop)
        .instrument(info_span!("train"))
        .await?;

    Ok(())
}
