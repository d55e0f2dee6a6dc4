//! Checkpoint files holding model parameters, optimizer state, epoch and loss.

use crate::{common::*, config::LoadCheckpoint};

/// The file name of the best checkpoint of a run.
pub const BEST_CHECKPOINT_FILE: &str = "best_model.pth";

const MODEL_PREFIX: &str = "model.";
const MOMENTUM_PREFIX: &str = "optimizer.momentum.";
const LR_KEY: &str = "optimizer.lr";
const EPOCH_KEY: &str = "meta.epoch";
const LOSS_KEY: &str = "meta.loss";

static CHECKPOINT_FILENAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^checkpoint_epoch_(\d+)\.pth$").unwrap());

/// The file name of the checkpoint saved after `epoch`.
pub fn epoch_checkpoint_file(epoch: usize) -> String {
    format!("checkpoint_epoch_{}.pth", epoch)
}

/// A snapshot of the trainable state.
#[derive(Debug)]
pub struct Checkpoint {
    /// The last completed epoch, counted from 1.
    pub epoch: usize,
    pub loss: f64,
    pub model: BTreeMap<String, Tensor>,
    /// Absent in inference-only checkpoints.
    pub optimizer: Option<SgdState>,
}

impl Checkpoint {
    pub fn capture(vs: &nn::VarStore, optimizer: Option<&Sgd>, epoch: usize, loss: f64) -> Self {
        Self {
            epoch,
            loss,
            model: vs.variables().into_iter().collect(),
            optimizer: optimizer.map(|optimizer| optimizer.state()),
        }
    }

    /// Writes the checkpoint, replacing any file at `path`.
    ///
    /// The content goes to a temporary file first and is renamed into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let mut named: Vec<(String, Tensor)> = vec![
            (EPOCH_KEY.to_string(), Tensor::from(self.epoch as i64)),
            (LOSS_KEY.to_string(), Tensor::from(self.loss)),
        ];
        named.extend(
            self.model
                .iter()
                .map(|(name, var)| (format!("{}{}", MODEL_PREFIX, name), var.shallow_clone())),
        );
        if let Some(SgdState {
            lr,
            momentum_buffers,
        }) = &self.optimizer
        {
            named.push((LR_KEY.to_string(), Tensor::from(*lr)));
            named.extend(momentum_buffers.iter().map(|(name, buffer)| {
                (format!("{}{}", MOMENTUM_PREFIX, name), buffer.shallow_clone())
            }));
        }

        let tmp_path = {
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(".tmp");
            PathBuf::from(tmp)
        };
        Tensor::save_multi(&named, &tmp_path)
            .with_context(|| format!("unable to write checkpoint '{}'", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("unable to write checkpoint '{}'", path.display()))?;

        Ok(())
    }

    /// Reads a checkpoint and moves every tensor to `device`.
    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            path.is_file(),
            "the checkpoint file '{}' does not exist",
            path.display()
        );

        let named = Tensor::load_multi_with_device(path, device)
            .with_context(|| format!("unable to read checkpoint '{}'", path.display()))?;

        let mut epoch = 0;
        let mut loss = 0.0;
        let mut lr = None;
        let mut model = BTreeMap::new();
        let mut momentum_buffers = BTreeMap::new();

        for (name, tensor) in named {
            if let Some(var_name) = name.strip_prefix(MODEL_PREFIX) {
                model.insert(var_name.to_string(), tensor);
            } else if let Some(var_name) = name.strip_prefix(MOMENTUM_PREFIX) {
                momentum_buffers.insert(var_name.to_string(), tensor);
            } else {
                match name.as_str() {
                    EPOCH_KEY => {
                        let value = i64::from(&tensor);
                        epoch = usize::try_from(value).map_err(|_| {
                            format_err!(
                                "malformed checkpoint '{}': negative epoch {}",
                                path.display(),
                                value
                            )
                        })?;
                    }
                    LOSS_KEY => loss = f64::from(&tensor),
                    LR_KEY => lr = Some(f64::from(&tensor)),
                    _ => warn!("ignore unknown entry '{}' in '{}'", name, path.display()),
                }
            }
        }

        let optimizer = match lr {
            Some(lr) => Some(SgdState {
                lr,
                momentum_buffers,
            }),
            None => {
                ensure!(
                    momentum_buffers.is_empty(),
                    "'{}' has momentum buffers but no learning rate",
                    path.display()
                );
                None
            }
        };

        Ok(Self {
            epoch,
            loss,
            model,
            optimizer,
        })
    }

    /// Copies the parameters into the var store and the optimizer state into the optimizer.
    ///
    /// The parameter names and shapes must match exactly.
    pub fn restore(self, vs: &nn::VarStore, optimizer: Option<&mut Sgd>) -> Result<()> {
        let Self {
            model,
            optimizer: optimizer_state,
            ..
        } = self;

        let mut variables = vs.variables();
        let unexpected: Vec<_> = model
            .keys()
            .filter(|name| !variables.contains_key(*name))
            .collect();
        let missing: Vec<_> = variables
            .keys()
            .filter(|name| !model.contains_key(*name))
            .collect();
        ensure!(
            unexpected.is_empty() && missing.is_empty(),
            "checkpoint does not match the model, missing {:?}, unexpected {:?}",
            missing,
            unexpected
        );

        tch::no_grad(|| -> Result<()> {
            for (name, value) in &model {
                let var = variables
                    .get_mut(name)
                    .ok_or_else(|| format_err!("no variable named '{}'", name))?;
                ensure!(
                    var.size() == value.size(),
                    "variable '{}' has shape {:?}, but the checkpoint has {:?}",
                    name,
                    var.size(),
                    value.size()
                );
                var.copy_(value);
            }
            Ok(())
        })?;

        match (optimizer, optimizer_state) {
            (Some(optimizer), Some(state)) => optimizer.load_state(state)?,
            (Some(_), None) => warn!("the checkpoint has no optimizer state"),
            (None, _) => (),
        }

        Ok(())
    }
}

/// Tracks the lowest loss of a run. Ties keep the earlier record.
#[derive(Debug, Clone)]
pub struct BestTracker {
    best: f64,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            best: f64::INFINITY,
        }
    }
}

impl BestTracker {
    /// Records a loss and returns true if it is strictly lower than all before.
    pub fn update(&mut self, loss: f64) -> bool {
        let improved = loss < self.best;
        if improved {
            self.best = loss;
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best.is_finite().then(|| self.best)
    }
}

/// Finds the checkpoint with the highest epoch number in a directory.
pub fn latest_checkpoint(dir: impl AsRef<Path>) -> Result<Option<(PathBuf, usize)>> {
    let dir = dir.as_ref();
    let pattern = dir.join("checkpoint_epoch_*.pth");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path '{}'", dir.display()))?;
    let paths: Vec<_> = glob::glob(pattern)?.try_collect()?;

    let latest = paths
        .into_iter()
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            let captures = CHECKPOINT_FILENAME_REGEX.captures(file_name)?;
            let epoch: usize = captures.get(1)?.as_str().parse().ok()?;
            Some((path, epoch))
        })
        .max_by_key(|(_path, epoch)| *epoch);

    Ok(latest)
}

/// Resolves the checkpoint to resume from.
pub fn resolve_checkpoint(
    checkpoint_dir: &Path,
    load_checkpoint: &LoadCheckpoint,
) -> Result<Option<PathBuf>> {
    let path = match load_checkpoint {
        LoadCheckpoint::Disabled => {
            info!("checkpoint loading is disabled");
            None
        }
        LoadCheckpoint::FromRecent => {
            let latest = if checkpoint_dir.is_dir() {
                latest_checkpoint(checkpoint_dir)?
            } else {
                None
            };

            match latest {
                Some((path, epoch)) => {
                    info!("found checkpoint of epoch {}", epoch);
                    Some(path)
                }
                None => {
                    warn!(
                        "no checkpoint file found in '{}', start from scratch",
                        checkpoint_dir.display()
                    );
                    None
                }
            }
        }
        LoadCheckpoint::FromFile { file } => {
            ensure!(file.is_file(), "{} is not a file", file.display());
            Some(file.to_owned())
        }
    };

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_tracker_is_strict() {
        let mut tracker = BestTracker::default();
        assert_eq!(tracker.best(), None);
        assert!(tracker.update(2.0));
        assert!(!tracker.update(2.0));
        assert!(tracker.update(1.5));
        assert!(!tracker.update(f64::NAN));
        assert!(!tracker.update(3.0));
        assert_eq!(tracker.best(), Some(1.5));
    }

    #[test]
    fn find_latest_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(latest_checkpoint(dir.path())?.is_none());

        for name in [
            "checkpoint_epoch_2.pth",
            "checkpoint_epoch_10.pth",
            "checkpoint_epoch_9.pth",
            "checkpoint_epoch_x.pth",
            BEST_CHECKPOINT_FILE,
        ] {
            fs::write(dir.path().join(name), b"")?;
        }

        let (path, epoch) = latest_checkpoint(dir.path())?.unwrap();
        assert_eq!(epoch, 10);
        assert_eq!(path, dir.path().join("checkpoint_epoch_10.pth"));
        Ok(())
    }

    #[test]
    fn checkpoint_without_optimizer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.pth");

        let vs = nn::VarStore::new(Device::Cpu);
        let _weight = vs.root().var("weight", &[2, 2], nn::Init::Const(0.5));
        Checkpoint::capture(&vs, None, 3, 0.25).save(&path)?;

        let checkpoint = Checkpoint::load(&path, Device::Cpu)?;
        assert_eq!(checkpoint.epoch, 3);
        assert_eq!(checkpoint.loss, 0.25);
        assert!(checkpoint.optimizer.is_none());
        assert!(!dir.path().join("model.pth.tmp").exists());
        Ok(())
    }

    #[test]
    fn checkpoint_defaults_missing_meta() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.pth");
        let weight = Tensor::ones(&[3], tch::kind::FLOAT_CPU);
        Tensor::save_multi(&[("model.weight", &weight)], &path)?;

        let checkpoint = Checkpoint::load(&path, Device::Cpu)?;
        assert_eq!(checkpoint.epoch, 0);
        assert_eq!(checkpoint.loss, 0.0);
        assert_eq!(checkpoint.model.len(), 1);
        Ok(())
    }

    #[test]
    fn negative_epoch_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("checkpoint_epoch_1.pth");
        let weight = Tensor::ones(&[3], tch::kind::FLOAT_CPU);
        let epoch = Tensor::from(-1i64);
        Tensor::save_multi(&[("model.weight", &weight), (EPOCH_KEY, &epoch)], &path)?;

        let err = Checkpoint::load(&path, Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("negative epoch"));
        Ok(())
    }

    #[test]
    fn restore_rejects_mismatch() -> Result<()> {
        let src = nn::VarStore::new(Device::Cpu);
        let _weight = src.root().var("weight", &[2], nn::Init::Const(1.0));
        let checkpoint = Checkpoint::capture(&src, None, 1, 0.0);

        let dst = nn::VarStore::new(Device::Cpu);
        let _bias = dst.root().var("bias", &[2], nn::Init::Const(0.0));
        assert!(checkpoint.restore(&dst, None).is_err());
        Ok(())
    }
}
