//! The epoch loop driving training, evaluation and checkpointing.

use crate::{
    checkpoint::{epoch_checkpoint_file, BestTracker, Checkpoint, BEST_CHECKPOINT_FILE},
    common::*,
    device::release_device_memory,
    lr_scheduler::LrScheduler,
    metrics::{MetricSnapshot, RunningMetrics},
    rate_meter::RateMeter,
};

/// The file receiving one JSON line per completed epoch.
pub const METRICS_FILE: &str = "metrics.jsonl";

/// Run parameters fixed for the lifetime of a trainer.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub seed: u64,
    pub device: Device,
    /// Whether the forward pass runs in the reduced-precision scope.
    pub mixed_precision: bool,
    /// The last epoch to run, counted from 1.
    pub epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
}

/// The result of [Trainer::run].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// The last epoch that ran to completion in this run.
    pub last_epoch: Option<usize>,
    /// The lowest validation loss of this run.
    pub best_loss: Option<f64>,
    pub interrupted: bool,
}

#[derive(Debug, Serialize)]
struct EpochRecord<'a> {
    epoch: usize,
    lr: f64,
    train: &'a MetricSnapshot,
    val: &'a MetricSnapshot,
    elapsed_secs: f64,
}

pub struct Trainer<M>
where
    M: DetectionModel,
{
    config: RunConfig,
    model: M,
    optimizer: Sgd,
    scaler: GradScaler,
    scheduler: LrScheduler,
    checkpoint_dir: PathBuf,
    start_epoch: usize,
    best: BestTracker,
    stop: Arc<AtomicBool>,
}

impl<M> Trainer<M>
where
    M: DetectionModel,
{
    pub fn new(
        config: RunConfig,
        model: M,
        optimizer: Sgd,
        scaler: GradScaler,
        scheduler: LrScheduler,
        checkpoint_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_owned();
        ensure!(
            !config.mixed_precision || scaler.is_enabled(),
            "mixed precision requires an enabled gradient scaler"
        );
        fs::create_dir_all(&checkpoint_dir).with_context(|| {
            format!(
                "unable to create checkpoint directory '{}'",
                checkpoint_dir.display()
            )
        })?;

        Ok(Self {
            config,
            model,
            optimizer,
            scaler,
            scheduler,
            checkpoint_dir,
            start_epoch: 1,
            best: BestTracker::default(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replaces the stop flag. Setting the flag ends the run at the next batch boundary.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// The epoch the next call to [Trainer::run] starts at.
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    /// Restores a checkpoint and continues after its epoch.
    ///
    /// Returns the epoch recorded in the checkpoint.
    pub fn resume(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let checkpoint = Checkpoint::load(path, self.config.device)?;
        let epoch = checkpoint.epoch;
        let loss = checkpoint.loss;
        checkpoint.restore(self.model.var_store(), Some(&mut self.optimizer))?;

        self.start_epoch = epoch + 1;
        self.scheduler.set_step(epoch);

        info!(
            "resumed from '{}' at epoch {}, loss {:.4}, next epoch {}",
            path.display(),
            epoch,
            loss,
            self.start_epoch
        );
        Ok(epoch)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Runs the remaining epochs.
    pub fn run(&mut self, train_loader: &DataLoader, val_loader: &DataLoader) -> Result<RunSummary> {
        let mut summary = RunSummary {
            last_epoch: None,
            best_loss: None,
            interrupted: false,
        };

        if self.start_epoch > self.config.epochs {
            warn!(
                "epoch {} is beyond the configured {} epochs, nothing to do",
                self.start_epoch, self.config.epochs
            );
            return Ok(summary);
        }

        info!(
            "start training at epoch {}, {} training and {} validation images",
            self.start_epoch,
            train_loader.num_samples(),
            val_loader.num_samples()
        );

        for epoch in self.start_epoch..=self.config.epochs {
            let since = Instant::now();
            let lr = self.scheduler.next();
            self.optimizer.set_lr(lr);
            info!("epoch {}/{}\tlr: {:.6}", epoch, self.config.epochs, lr);

            let train_metrics = self.train_one_epoch(train_loader, epoch)?;
            if self.is_stopped() {
                summary.interrupted = true;
                break;
            }

            let val_metrics = self.evaluate(val_loader, epoch)?;
            if self.is_stopped() {
                summary.interrupted = true;
                break;
            }

            let train_loss = train_metrics.loss();
            let val_loss = val_metrics.loss();
            info!(
                "epoch {}/{}\ttrain loss: {:.4}\tval loss: {:.4}",
                epoch, self.config.epochs, train_loss, val_loss
            );

            self.append_metrics(&EpochRecord {
                epoch,
                lr,
                train: &train_metrics,
                val: &val_metrics,
                elapsed_secs: since.elapsed().as_secs_f64(),
            })?;

            let checkpoint =
                Checkpoint::capture(self.model.var_store(), Some(&self.optimizer), epoch, val_loss);
            let path = self.checkpoint_dir.join(epoch_checkpoint_file(epoch));
            checkpoint.save(&path)?;
            info!("saved checkpoint '{}'", path.display());

            if self.best.update(val_loss) {
                let path = self.checkpoint_dir.join(BEST_CHECKPOINT_FILE);
                checkpoint.save(&path)?;
                info!("new best model with val loss {:.4}", val_loss);
            }

            drop(checkpoint);
            release_device_memory(self.config.device);

            summary.last_epoch = Some(epoch);
            self.start_epoch = epoch + 1;
        }

        if summary.interrupted {
            warn!("training interrupted, no checkpoint is written for the unfinished epoch");
        }
        summary.best_loss = self.best.best();
        Ok(summary)
    }

    /// Trains over one pass of the loader. Stops early if the stop flag is set.
    pub fn train_one_epoch(&mut self, loader: &DataLoader, epoch: usize) -> Result<MetricSnapshot> {
        let mut metrics = RunningMetrics::new();
        let mut meter = RateMeter::new(Duration::from_secs(10));
        let mut skipped_steps = 0;
        let num_batches = loader.num_batches();

        for (index, batch) in loader.epoch(epoch)?.enumerate() {
            if self.is_stopped() {
                warn!("stop requested at epoch {} batch {}", epoch, index);
                break;
            }

            let batch = batch?.to_device(self.config.device);
            let (losses, outcome) = self.train_step(&batch)?;

            if let StepOutcome::Skipped { scale } = outcome {
                skipped_steps += 1;
                warn!(
                    "non-finite gradients at epoch {} batch {}, skip the step, loss scale was {}",
                    epoch, index, scale
                );
            }
            metrics.update(losses);

            meter.tick();
            if let Some(rate) = meter.poll() {
                info!(
                    "epoch: {}\tbatch: {}/{}\t{:.2} batches/s\t{:.2} images/s",
                    epoch,
                    index + 1,
                    num_batches,
                    rate,
                    rate * self.config.batch_size as f64
                );
            }
        }

        if self.config.mixed_precision {
            metrics.update([("skipped_steps", skipped_steps as f64)]);
        }
        Ok(metrics.snapshot())
    }

    /// One optimizer step. The returned scalars start with the total `loss`.
    fn train_step(&mut self, batch: &Batch) -> Result<(Vec<(String, f64)>, StepOutcome)> {
        let Self {
            config,
            model,
            optimizer,
            scaler,
            ..
        } = self;

        let losses = autocast(config.mixed_precision, || {
            model.compute_losses(&batch.images, &batch.targets, true)
        })?;
        let total = losses.total()?;

        optimizer.zero_grad();
        scaler.scale(&total)?.backward();
        scaler.unscale_and_check(optimizer)?;
        let outcome = scaler.step(optimizer)?;
        scaler.update()?;

        let scalars = iter::once(("loss".to_string(), f64::from(&total)))
            .chain(losses.scalars())
            .collect();
        Ok((scalars, outcome))
    }

    /// Computes the validation losses without tracking gradients.
    ///
    /// The forward call runs in training mode, the model restores its own mode afterwards.
    pub fn evaluate(&mut self, loader: &DataLoader, epoch: usize) -> Result<MetricSnapshot> {
        let Self {
            config,
            model,
            stop,
            ..
        } = self;
        let mut metrics = RunningMetrics::new();

        tch::no_grad(|| -> Result<()> {
            for (index, batch) in loader.epoch(epoch)?.enumerate() {
                if stop.load(Ordering::SeqCst) {
                    warn!("stop requested during evaluation at batch {}", index);
                    break;
                }

                let batch = batch?.to_device(config.device);
                // losses are only produced in training mode, gradients stay off
                let losses = model.compute_losses(&batch.images, &batch.targets, true)?;
                let total = f64::from(losses.total()?);
                metrics.update(iter::once(("loss".to_string(), total)).chain(losses.scalars()));
            }
            Ok(())
        })?;

        Ok(metrics.snapshot())
    }

    fn append_metrics(&self, record: &EpochRecord<'_>) -> Result<()> {
        let path = self.checkpoint_dir.join(METRICS_FILE);
        let line = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("unable to open '{}'", path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
