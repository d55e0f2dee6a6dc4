use anyhow::Result;
use noisy_float::prelude::*;
use rcnn_dl::{
    amp::GradScalerInit,
    dataset::{split_indices, AnnotationStore, DataLoader, DataLoaderInit, SampleBuilder, Target},
    model::{DetectionModel, LossMap, Prediction},
    optim::SgdInit,
};
use std::{
    fs,
    num::NonZeroUsize,
    path::Path,
    sync::{atomic::Ordering, Arc},
};
use tch::{nn, vision, Device, Kind, Tensor};
use train::{
    checkpoint::{epoch_checkpoint_file, Checkpoint, BEST_CHECKPOINT_FILE},
    config::LearningRateSchedule,
    lr_scheduler::LrScheduler,
    trainer::{RunConfig, Trainer, METRICS_FILE},
};

const TABLE: &str = "\
img_id,img_file,img_width,img_height,x,y,width,height,cat_name
1,1.png,16,16,1,1,6,6,glass
1,1.png,16,16,8,8,6,6,metal
2,2.png,16,16,2,2,4,4,metal
3,3.png,16,16,0,0,10,10,glass
4,4.png,16,16,3,3,5,5,plastic
4,4.png,16,16,20,20,5,5,plastic
5,5.png,16,16,4,4,8,8,glass
";

/// Regresses the object count from the mean pixel value.
struct CountRegressor {
    vs: nn::VarStore,
    weight: Tensor,
    bias: Tensor,
    /// The `train` flag and whether gradients were tracked, per loss call.
    calls: Vec<(bool, bool)>,
    /// The loss call that returns an infinite loss.
    poison_call: Option<usize>,
}

impl CountRegressor {
    fn new(device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let weight = root.var("head.weight", &[1], nn::Init::Const(0.5));
        let bias = root.var("head.bias", &[1], nn::Init::Const(0.0));
        Self {
            vs,
            weight,
            bias,
            calls: vec![],
            poison_call: None,
        }
    }
}

impl DetectionModel for CountRegressor {
    fn compute_losses(
        &mut self,
        images: &[Tensor],
        targets: &[Target],
        train: bool,
    ) -> Result<LossMap> {
        let means: Vec<_> = images
            .iter()
            .map(|image| image.mean(Kind::Float).view([1]))
            .collect();
        let preds = Tensor::cat(&means, 0) * &self.weight + &self.bias;
        let counts: Vec<f32> = targets
            .iter()
            .map(|target| target.num_objects() as f32)
            .collect();
        let counts = Tensor::of_slice(&counts).to_device(self.vs.device());
        let diff = preds - counts;

        let mut loss_count = (&diff * &diff).mean(Kind::Float);
        if self.poison_call == Some(self.calls.len()) {
            loss_count = loss_count * f64::INFINITY;
        }
        self.calls.push((train, diff.requires_grad()));

        let mut losses = LossMap::new();
        losses.insert("loss_count", loss_count);
        losses.insert("loss_decay", (&self.weight * &self.weight).sum(Kind::Float) * 0.01);
        Ok(losses)
    }

    fn predict(&mut self, images: &[Tensor]) -> Result<Vec<Prediction>> {
        let device = self.vs.device();
        let predictions = images
            .iter()
            .map(|_| Prediction {
                boxes: Tensor::zeros(&[0, 4], (Kind::Float, device)),
                labels: Tensor::zeros(&[0], (Kind::Int64, device)),
                scores: Tensor::zeros(&[0], (Kind::Float, device)),
            })
            .collect();
        Ok(predictions)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

fn write_dataset(dir: &Path) -> Result<()> {
    fs::write(dir.join("annotations.csv"), TABLE)?;
    for id in 1..=5i64 {
        let image = Tensor::full(&[3, 16, 16], id * 40, tch::kind::INT64_CPU).to_kind(Kind::Uint8);
        vision::image::save(&image, dir.join(format!("{}.png", id)))?;
    }
    Ok(())
}

fn loaders(dir: &Path) -> Result<(DataLoader, DataLoader)> {
    loaders_with_batch_size(dir, 2)
}

fn loaders_with_batch_size(dir: &Path, batch_size: usize) -> Result<(DataLoader, DataLoader)> {
    let store = Arc::new(AnnotationStore::load(dir.join("annotations.csv"), dir)?);
    let (train_indices, val_indices) = split_indices(store.len(), 0.8, 42)?;
    let builder = Arc::new(SampleBuilder::new(store, None, 7));
    let init = DataLoaderInit {
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        num_workers: 0,
        prefetch: NonZeroUsize::new(1).unwrap(),
        shuffle: true,
        seed: 7,
    };
    let train_loader = init.clone().build(builder.clone(), train_indices)?;
    let val_loader = DataLoaderInit {
        shuffle: false,
        ..init
    }
    .build(builder, val_indices)?;
    Ok((train_loader, val_loader))
}

fn trainer(dir: &Path, epochs: usize) -> Result<Trainer<CountRegressor>> {
    trainer_with(CountRegressor::new(Device::Cpu), dir, epochs, false)
}

fn trainer_with(
    model: CountRegressor,
    dir: &Path,
    epochs: usize,
    mixed_precision: bool,
) -> Result<Trainer<CountRegressor>> {
    let optimizer = SgdInit {
        lr: r64(0.1),
        ..Default::default()
    }
    .build(model.var_store())?;
    let scaler = GradScalerInit {
        enabled: mixed_precision,
        ..Default::default()
    }
    .build()?;
    let scheduler = LrScheduler::new(
        &LearningRateSchedule::StepDecay {
            lr: r64(0.1),
            step_size: NonZeroUsize::new(3).unwrap(),
            gamma: r64(0.1),
        },
        None,
    )?;
    let config = RunConfig {
        seed: 7,
        device: Device::Cpu,
        mixed_precision,
        epochs,
        batch_size: 2,
        num_workers: 0,
    };
    Trainer::new(config, model, optimizer, scaler, scheduler, dir.join("checkpoints"))
}

fn metric_lines(dir: &Path) -> Result<Vec<serde_json::Value>> {
    let text = fs::read_to_string(dir.join("checkpoints").join(METRICS_FILE))?;
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    Ok(lines)
}

#[test]
fn fresh_run_writes_checkpoints_and_metrics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders(dir.path())?;

    let mut trainer = trainer(dir.path(), 2)?;
    assert_eq!(trainer.start_epoch(), 1);
    let summary = trainer.run(&train_loader, &val_loader)?;

    assert_eq!(summary.last_epoch, Some(2));
    assert!(!summary.interrupted);
    assert!(summary.best_loss.is_some());
    assert_eq!(trainer.start_epoch(), 3);

    let checkpoint_dir = dir.path().join("checkpoints");
    assert!(checkpoint_dir.join(epoch_checkpoint_file(1)).is_file());
    assert!(checkpoint_dir.join(epoch_checkpoint_file(2)).is_file());
    assert!(checkpoint_dir.join(BEST_CHECKPOINT_FILE).is_file());
    assert!(!checkpoint_dir.join(epoch_checkpoint_file(3)).exists());

    let lines = metric_lines(dir.path())?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["epoch"], 1);
    assert_eq!(lines[1]["epoch"], 2);
    for line in &lines {
        assert!(line["train"]["loss"].is_number());
        assert!(line["train"]["loss_count"].is_number());
        assert!(line["val"]["loss_decay"].is_number());
    }

    // the best checkpoint records the lowest validation loss
    let best = Checkpoint::load(checkpoint_dir.join(BEST_CHECKPOINT_FILE), Device::Cpu)?;
    let val_losses: Vec<f64> = lines
        .iter()
        .map(|line| line["val"]["loss"].as_f64().unwrap())
        .collect();
    let lowest = val_losses.iter().cloned().fold(f64::INFINITY, f64::min);
    assert!((best.loss - lowest).abs() < 1e-6);

    let weight = f64::from(&trainer.model().var_store().variables()["head.weight"]);
    assert!((weight - 0.5).abs() > 1e-6);
    Ok(())
}

#[test]
fn resume_continues_after_recorded_epoch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders(dir.path())?;

    let checkpoint_path = dir.path().join(epoch_checkpoint_file(7));
    {
        let model = CountRegressor::new(Device::Cpu);
        let optimizer = SgdInit::default().build(model.var_store())?;
        tch::no_grad(|| {
            let _ = model.weight.shallow_clone().fill_(2.0);
        });
        Checkpoint::capture(model.var_store(), Some(&optimizer), 7, 1.25).save(&checkpoint_path)?;
    }

    let mut trainer = trainer(dir.path(), 8)?;
    assert_eq!(trainer.resume(&checkpoint_path)?, 7);
    assert_eq!(trainer.start_epoch(), 8);
    let weight = f64::from(&trainer.model().var_store().variables()["head.weight"]);
    assert!((weight - 2.0).abs() < 1e-6);
    assert!((trainer.optimizer().lr() - 0.005).abs() < 1e-9);

    let summary = trainer.run(&train_loader, &val_loader)?;
    assert_eq!(summary.last_epoch, Some(8));

    let checkpoint_dir = dir.path().join("checkpoints");
    assert!(checkpoint_dir.join(epoch_checkpoint_file(8)).is_file());
    assert!(!checkpoint_dir.join(epoch_checkpoint_file(7)).exists());
    assert!(!checkpoint_dir.join(epoch_checkpoint_file(9)).exists());

    let lines = metric_lines(dir.path())?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["epoch"], 8);
    // step decay positioned at seven completed epochs: 0.1 * 0.1^2
    assert!((lines[0]["lr"].as_f64().unwrap() - 0.001).abs() < 1e-9);
    Ok(())
}

#[test]
fn checkpoint_restores_model_and_optimizer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders(dir.path())?;

    let mut trainer = trainer(dir.path(), 1)?;
    trainer.run(&train_loader, &val_loader)?;

    let device = if tch::Cuda::is_available() {
        Device::Cuda(0)
    } else {
        Device::Cpu
    };
    let path = dir.path().join("checkpoints").join(epoch_checkpoint_file(1));
    let loaded = Checkpoint::load(&path, device)?;
    let saved = Checkpoint::capture(
        trainer.model().var_store(),
        Some(trainer.optimizer()),
        1,
        loaded.loss,
    );

    assert_eq!(loaded.epoch, 1);
    assert!(loaded.loss.is_finite());
    assert_eq!(
        loaded.model.keys().collect::<Vec<_>>(),
        saved.model.keys().collect::<Vec<_>>()
    );
    for (name, value) in &loaded.model {
        assert_eq!(value.device(), device);
        assert!(value.to_device(Device::Cpu).equal(&saved.model[name]));
    }

    let loaded_state = loaded.optimizer.as_ref().unwrap();
    let saved_state = saved.optimizer.as_ref().unwrap();
    assert!((loaded_state.lr - saved_state.lr).abs() < 1e-12);
    assert_eq!(
        loaded_state.momentum_buffers.keys().collect::<Vec<_>>(),
        saved_state.momentum_buffers.keys().collect::<Vec<_>>()
    );
    assert!(!loaded_state.momentum_buffers.is_empty());
    for (name, buffer) in &loaded_state.momentum_buffers {
        assert!(buffer
            .to_device(Device::Cpu)
            .equal(&saved_state.momentum_buffers[name]));
    }

    // restoring into a fresh trainer reproduces the parameters
    let mut other = self::trainer(dir.path(), 1)?;
    other.resume(&path)?;
    let restored = other.model().var_store().variables();
    for (name, value) in trainer.model().var_store().variables() {
        assert!(restored[&name].equal(&value));
    }
    Ok(())
}

#[test]
fn stop_flag_ends_run_without_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders(dir.path())?;

    let mut trainer = trainer(dir.path(), 3)?;
    trainer.stop_flag().store(true, Ordering::SeqCst);
    let summary = trainer.run(&train_loader, &val_loader)?;

    assert!(summary.interrupted);
    assert_eq!(summary.last_epoch, None);
    let checkpoint_dir = dir.path().join("checkpoints");
    assert!(!checkpoint_dir.join(epoch_checkpoint_file(1)).exists());
    assert!(!checkpoint_dir.join(BEST_CHECKPOINT_FILE).exists());
    assert!(!checkpoint_dir.join(METRICS_FILE).exists());
    Ok(())
}

#[test]
fn validation_runs_in_training_mode_without_gradients() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders(dir.path())?;
    assert_eq!(train_loader.num_batches(), 2);
    assert_eq!(val_loader.num_batches(), 1);

    let mut trainer = trainer(dir.path(), 1)?;
    trainer.run(&train_loader, &val_loader)?;

    // two training batches with gradients, then one validation batch without
    assert_eq!(
        trainer.model().calls,
        vec![(true, true), (true, true), (true, false)]
    );
    Ok(())
}

#[test]
fn non_finite_step_is_skipped_under_mixed_precision() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let (train_loader, val_loader) = loaders_with_batch_size(dir.path(), 4)?;
    assert_eq!(train_loader.num_batches(), 1);

    let mut model = CountRegressor::new(Device::Cpu);
    model.poison_call = Some(0);
    let mut trainer = trainer_with(model, dir.path(), 2, true)?;
    let summary = trainer.run(&train_loader, &val_loader)?;
    assert_eq!(summary.last_epoch, Some(2));

    let lines = metric_lines(dir.path())?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["train"]["skipped_steps"], 1.0);
    assert_eq!(lines[1]["train"]["skipped_steps"], 0.0);
    assert!(lines[1]["train"]["loss"].is_number());

    // the only step of epoch 1 was skipped, so its checkpoint holds the initial values
    let checkpoint_dir = dir.path().join("checkpoints");
    let first = Checkpoint::load(checkpoint_dir.join(epoch_checkpoint_file(1)), Device::Cpu)?;
    assert!((f64::from(&first.model["head.weight"]) - 0.5).abs() < 1e-9);
    assert!(f64::from(&first.model["head.bias"]).abs() < 1e-9);

    // the step of epoch 2 was applied
    let weight = f64::from(&trainer.model().var_store().variables()["head.weight"]);
    assert!(weight.is_finite());
    assert!((weight - 0.5).abs() > 1e-6);
    Ok(())
}
