//! The training program for region-based detectors.

pub mod checkpoint;
pub mod common;
pub mod config;
pub mod device;
pub mod lr_scheduler;
pub mod metrics;
mod rate_meter;
pub mod trainer;

use crate::{
    checkpoint::resolve_checkpoint,
    common::*,
    config::{Config, ModelConfig},
    device::{select_device, use_mixed_precision},
    lr_scheduler::LrScheduler,
    trainer::{RunConfig, RunSummary, Trainer},
};
use rcnn_dl::model::ScriptedDetector;

/// The category map written next to the checkpoints.
pub const CATEGORIES_FILE: &str = "categories.json";

/// The entry of training program.
///
/// The run ends at the next batch boundary once `stop` is set.
pub async fn start(config: Arc<Config>, stop: Arc<AtomicBool>) -> Result<()> {
    let output_dir = config.logging.dir.clone();

    // create dirs and save config
    {
        tokio::fs::create_dir_all(&output_dir).await.with_context(|| {
            format!(
                "unable to create output directory '{}'",
                output_dir.display()
            )
        })?;
        let path = output_dir.join("config.json5");
        let text = serde_json::to_string_pretty(&*config)?;
        tokio::fs::write(&path, text).await?;
    }

    let summary =
        tokio::task::spawn_blocking(move || training_worker(&config, &output_dir, stop)).await??;

    match summary {
        RunSummary {
            interrupted: true,
            last_epoch,
            ..
        } => warn!("training stopped, last completed epoch {:?}", last_epoch),
        RunSummary {
            last_epoch,
            best_loss,
            ..
        } => info!(
            "training finished at epoch {:?}, best val loss {:?}",
            last_epoch, best_loss
        ),
    }

    Ok(())
}

fn training_worker(config: &Config, output_dir: &Path, stop: Arc<AtomicBool>) -> Result<RunSummary> {
    let Config {
        model: ref model_config,
        ref dataset,
        ref preprocessor,
        ref training,
        ..
    } = *config;

    let device = select_device(training.device, training.force_cpu);
    let mixed_precision = use_mixed_precision(training.mixed_precision, device);
    tch::manual_seed(training.seed as i64);

    // load dataset
    info!("loading dataset '{}'", dataset.csv_file.display());
    let store = AnnotationStore::load(&dataset.csv_file, &dataset.data_dir)?;
    ensure!(!store.is_empty(), "the dataset has no images");
    info!(
        "loaded {} images, {} classes including background",
        store.len(),
        store.categories().num_classes()
    );
    store
        .categories()
        .save(output_dir.join(CATEGORIES_FILE))
        .context("unable to save the category map")?;

    let (train_indices, val_indices) =
        split_indices(store.len(), dataset.train_ratio.raw(), dataset.split_seed)?;
    info!(
        "split into {} training and {} validation images",
        train_indices.len(),
        val_indices.len()
    );

    let num_workers = preprocessor.num_workers;
    if num_workers > num_cpus::get() {
        warn!(
            "{} loader workers requested, but only {} CPUs are available",
            num_workers,
            num_cpus::get()
        );
    }

    let store = Arc::new(store);
    let (train_loader, val_loader) = {
        let train_builder = SampleBuilder::new(
            store.clone(),
            Some(preprocessor.train.clone().build()?),
            training.seed,
        );
        let val_builder = SampleBuilder::new(
            store.clone(),
            Some(preprocessor.validation.clone().build()?),
            training.seed,
        );
        let init = DataLoaderInit {
            batch_size: training.batch_size,
            num_workers,
            prefetch: preprocessor.prefetch,
            shuffle: true,
            seed: training.seed,
        };
        let train_loader = init.clone().build(Arc::new(train_builder), train_indices)?;
        let val_loader = DataLoaderInit {
            shuffle: false,
            ..init
        }
        .build(Arc::new(val_builder), val_indices)?;
        (train_loader, val_loader)
    };

    // init model
    info!("initializing model");
    let model = match model_config {
        ModelConfig::TorchScript { file } => ScriptedDetector::load(file, device)?,
    };

    let scheduler = LrScheduler::new(&training.optimizer.lr_schedule, None)?;
    let optimizer = SgdInit {
        lr: r64(scheduler.lr()),
        momentum: training.optimizer.momentum,
        weight_decay: training.optimizer.weight_decay,
    }
    .build(model.var_store())?;
    let scaler = GradScalerInit {
        enabled: mixed_precision,
        ..training.grad_scaler
    }
    .build()?;

    let run_config = RunConfig {
        seed: training.seed,
        device,
        mixed_precision,
        epochs: training.epochs.get(),
        batch_size: training.batch_size.get(),
        num_workers,
    };
    let mut trainer = Trainer::new(
        run_config,
        model,
        optimizer,
        scaler,
        scheduler,
        output_dir,
    )?
    .with_stop_flag(stop);

    if let Some(path) = resolve_checkpoint(output_dir, &training.load_checkpoint)? {
        trainer.resume(path)?;
    }

    trainer.run(&train_loader, &val_loader)
}
