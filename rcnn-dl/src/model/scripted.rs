use super::{DetectionModel, LossMap, Prediction};
use crate::{amp::is_autocast_enabled, common::*, dataset::Target};
use tch::{IValue, TrainableCModule};

/// A detector loaded from a TorchScript file.
///
/// The module must export two methods:
///
/// - `compute_losses(images: List[Tensor], boxes: List[Tensor], labels: List[Tensor], autocast: bool) -> Dict[str, Tensor]`
/// - `predict(images: List[Tensor]) -> List[Dict[str, Tensor]]`, each dict holding `boxes`, `labels` and `scores`.
///
/// Its parameters are registered in the var store so that the optimizer and
/// checkpoints can reach them. Each call switches the module to the mode it
/// needs and switches it back afterwards.
pub struct ScriptedDetector {
    vs: nn::VarStore,
    module: TrainableCModule,
    training: bool,
}

impl ScriptedDetector {
    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        let vs = nn::VarStore::new(device);
        let mut module = TrainableCModule::load(path, vs.root())
            .with_context(|| format!("unable to load TorchScript module '{}'", path.display()))?;
        module.set_train();
        info!(
            "loaded TorchScript module '{}' with {} variables",
            path.display(),
            vs.variables().len()
        );
        Ok(Self {
            vs,
            module,
            training: true,
        })
    }

    /// Sets the mode the module is left in between calls.
    pub fn set_train(&mut self, training: bool) {
        self.switch_mode(training);
        self.training = training;
    }

    fn switch_mode(&mut self, training: bool) {
        if training {
            self.module.set_train();
        } else {
            self.module.set_eval();
        }
    }

    /// Runs `f` with the module in the given mode, then restores the previous mode.
    fn with_mode<T>(&mut self, training: bool, f: impl FnOnce(&TrainableCModule) -> T) -> T {
        let previous = self.training;
        self.switch_mode(training);
        let output = f(&self.module);
        self.switch_mode(previous);
        output
    }
}

impl DetectionModel for ScriptedDetector {
    fn compute_losses(
        &mut self,
        images: &[Tensor],
        targets: &[Target],
        train: bool,
    ) -> Result<LossMap> {
        ensure!(
            images.len() == targets.len(),
            "got {} images but {} targets",
            images.len(),
            targets.len()
        );

        let inputs = [
            IValue::TensorList(images.iter().map(Tensor::shallow_clone).collect()),
            IValue::TensorList(
                targets
                    .iter()
                    .map(|target| target.boxes.shallow_clone())
                    .collect(),
            ),
            IValue::TensorList(
                targets
                    .iter()
                    .map(|target| target.labels.shallow_clone())
                    .collect(),
            ),
            IValue::Bool(is_autocast_enabled()),
        ];
        let output =
            self.with_mode(train, |module| module.method_is("compute_losses", &inputs))?;

        match output {
            IValue::GenericDict(entries) => entries
                .into_iter()
                .map(|(key, value)| match (key, value) {
                    (IValue::String(name), IValue::Tensor(loss)) => Ok((name, loss)),
                    (key, value) => bail!("unexpected loss entry {:?}: {:?}", key, value),
                })
                .try_collect(),
            other => bail!("compute_losses returned {:?}, expect a dict", other),
        }
    }

    fn predict(&mut self, images: &[Tensor]) -> Result<Vec<Prediction>> {
        let inputs = [IValue::TensorList(
            images.iter().map(Tensor::shallow_clone).collect(),
        )];
        let output = self.with_mode(false, |module| {
            tch::no_grad(|| module.method_is("predict", &inputs))
        })?;

        let items = match output {
            IValue::GenericList(items) | IValue::Tuple(items) => items,
            other => bail!("predict returned {:?}, expect a list", other),
        };
        items.into_iter().map(parse_prediction).try_collect()
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

fn parse_prediction(value: IValue) -> Result<Prediction> {
    let entries = match value {
        IValue::GenericDict(entries) => entries,
        other => bail!("expect a prediction dict, but get {:?}", other),
    };

    let mut fields: HashMap<String, Tensor> = entries
        .into_iter()
        .filter_map(|(key, value)| match (key, value) {
            (IValue::String(name), IValue::Tensor(tensor)) => Some((name, tensor)),
            _ => None,
        })
        .collect();
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| format_err!("the prediction has no '{}' entry", name))
    };

    Ok(Prediction {
        boxes: take("boxes")?.to_kind(Kind::Float),
        labels: take("labels")?.to_kind(Kind::Int64),
        scores: take("scores")?.to_kind(Kind::Float),
    })
}
