//! Stochastic gradient descent with exportable state.

use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SgdInit {
    pub lr: R64,
    pub momentum: R64,
    pub weight_decay: R64,
}

impl Default for SgdInit {
    fn default() -> Self {
        Self {
            lr: r64(0.005),
            momentum: r64(0.9),
            weight_decay: r64(0.0005),
        }
    }
}

impl SgdInit {
    /// Builds the optimizer over the trainable variables of a var store.
    pub fn build(self, vs: &nn::VarStore) -> Result<Sgd> {
        let Self {
            lr,
            momentum,
            weight_decay,
        } = self;
        ensure!(lr >= 0.0, "learning rate must be non-negative");
        ensure!(momentum >= 0.0, "momentum must be non-negative");
        ensure!(weight_decay >= 0.0, "weight decay must be non-negative");

        let params: Vec<_> = vs
            .variables()
            .into_iter()
            .filter(|(_, var)| var.requires_grad())
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .collect();
        ensure!(!params.is_empty(), "no trainable variables found");

        Ok(Sgd {
            lr: lr.raw(),
            momentum: momentum.raw(),
            weight_decay: weight_decay.raw(),
            params,
            momentum_buffers: BTreeMap::new(),
        })
    }
}

/// The serializable part of the optimizer.
#[derive(Debug)]
pub struct SgdState {
    pub lr: f64,
    pub momentum_buffers: BTreeMap<String, Tensor>,
}

#[derive(Debug)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    params: Vec<(String, Tensor)>,
    momentum_buffers: BTreeMap<String, Tensor>,
}

impl Sgd {
    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    pub fn params(&self) -> impl Iterator<Item = &Tensor> {
        self.params.iter().map(|(_, param)| param)
    }

    pub fn zero_grad(&mut self) {
        self.params.iter_mut().for_each(|(_, param)| param.zero_grad());
    }

    /// Updates the parameters with their current gradients.
    ///
    /// Parameters without gradients are left untouched.
    pub fn step(&mut self) {
        let Self {
            lr,
            momentum,
            weight_decay,
            ref mut params,
            ref mut momentum_buffers,
        } = *self;

        tch::no_grad(|| {
            for (name, param) in params.iter_mut() {
                let grad = param.grad();
                if !grad.defined() {
                    continue;
                }

                let mut update = if weight_decay != 0.0 {
                    &grad + &*param * weight_decay
                } else {
                    grad
                };

                if momentum != 0.0 {
                    update = match momentum_buffers.get_mut(name) {
                        Some(buffer) => {
                            let next = &*buffer * momentum + &update;
                            buffer.copy_(&next);
                            buffer.shallow_clone()
                        }
                        None => {
                            let buffer = update.detach().copy();
                            momentum_buffers.insert(name.clone(), buffer.shallow_clone());
                            buffer
                        }
                    };
                }

                let next = &*param - update * lr;
                param.copy_(&next);
            }
        });
    }

    pub fn state(&self) -> SgdState {
        SgdState {
            lr: self.lr,
            momentum_buffers: self
                .momentum_buffers
                .iter()
                .map(|(name, buffer)| (name.clone(), buffer.shallow_clone()))
                .collect(),
        }
    }

    /// Restores the state, moving buffers to the devices of their parameters.
    pub fn load_state(&mut self, state: SgdState) -> Result<()> {
        let SgdState {
            lr,
            momentum_buffers,
        } = state;

        let buffers: BTreeMap<_, _> = momentum_buffers
            .into_iter()
            .map(|(name, buffer)| {
                let (_, param) = self
                    .params
                    .iter()
                    .find(|(param_name, _)| *param_name == name)
                    .ok_or_else(|| format_err!("no parameter named '{}'", name))?;
                ensure!(
                    buffer.size() == param.size(),
                    "momentum buffer '{}' has shape {:?}, but the parameter has shape {:?}",
                    name,
                    buffer.size(),
                    param.size()
                );
                let buffer = buffer.to_device(param.device()).to_kind(param.kind());
                Ok((name, buffer))
            })
            .try_collect()?;

        self.lr = lr;
        self.momentum_buffers = buffers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sgd_momentum_update() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let weight = vs.root().var("weight", &[1], nn::Init::Const(1.0));
        let mut sgd = SgdInit {
            lr: r64(0.1),
            momentum: r64(0.9),
            weight_decay: r64(0.0),
        }
        .build(&vs)?;

        // d(3w)/dw = 3
        for _ in 0..2 {
            sgd.zero_grad();
            (&weight * 3.0).sum(Kind::Float).backward();
            sgd.step();
        }

        // step 1: buf = 3, w = 1 - 0.3 = 0.7
        // step 2: buf = 0.9 * 3 + 3 = 5.7, w = 0.7 - 0.57 = 0.13
        assert_abs_diff_eq!(f64::from(&weight), 0.13, epsilon = 1e-5);

        let state = sgd.state();
        assert_abs_diff_eq!(f64::from(&state.momentum_buffers["weight"]), 5.7, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn sgd_weight_decay() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let weight = vs.root().var("weight", &[1], nn::Init::Const(2.0));
        let mut sgd = SgdInit {
            lr: r64(0.5),
            momentum: r64(0.0),
            weight_decay: r64(0.1),
        }
        .build(&vs)?;

        sgd.zero_grad();
        (&weight * 1.0).sum(Kind::Float).backward();
        sgd.step();

        // w = 2 - 0.5 * (1 + 0.1 * 2)
        assert_abs_diff_eq!(f64::from(&weight), 1.4, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn sgd_state_rejects_unknown_parameter() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _weight = vs.root().var("weight", &[2], nn::Init::Const(0.0));
        let mut sgd = SgdInit::default().build(&vs)?;

        let mut momentum_buffers = BTreeMap::new();
        momentum_buffers.insert("bias".to_string(), Tensor::zeros(&[2], FLOAT_CPU));
        let state = SgdState {
            lr: 0.1,
            momentum_buffers,
        };
        assert!(sgd.load_state(state).is_err());
        assert_abs_diff_eq!(sgd.lr(), 0.005);
        Ok(())
    }
}
