//! Optimizers.
//!
//! Small, allocation-free-per-step optimizers that update a `BilinearNet`
//! given a set of `Gradients`.
//!
//! Design notes:
//! - Optimizer *state* (Adam moments) lives outside the model; the training
//!   loop owns it and reuses it across steps.
//! - Weight decay is decoupled: parameters are scaled by `1 - lr * wd`
//!   before the gradient step, independent of the moment estimates.

use crate::{BilinearNet, Error, Gradients, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Optimizer choice for training.
pub enum Optimizer {
    /// Plain SGD.
    Sgd,
    /// AdamW (bias-corrected moments, decoupled weight decay).
    AdamW { beta1: f32, beta2: f32, eps: f32 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::AdamW {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl Optimizer {
    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd => Ok(()),
            Optimizer::AdamW { beta1, beta2, eps } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adamw beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adamw beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adamw eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate optimizer state for `model`.
    pub fn state(self, model: &BilinearNet) -> Result<OptimizerState> {
        self.validate()?;

        match self {
            Optimizer::Sgd => Ok(OptimizerState::Sgd),
            Optimizer::AdamW { beta1, beta2, eps } => Ok(OptimizerState::AdamW {
                beta1,
                beta2,
                eps,
                t: 0,
                beta1_pow: 1.0,
                beta2_pow: 1.0,
                m: zeros_like_params(model),
                v: zeros_like_params(model),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Owned optimizer state.
pub enum OptimizerState {
    /// Plain SGD (no state).
    #[default]
    Sgd,
    /// AdamW moments, parallel to the model's canonical parameter groups.
    AdamW {
        beta1: f32,
        beta2: f32,
        eps: f32,
        t: u64,
        beta1_pow: f32,
        beta2_pow: f32,
        m: Vec<Vec<f32>>,
        v: Vec<Vec<f32>>,
    },
}

impl OptimizerState {
    /// Apply one optimizer step.
    ///
    /// `lr` is passed in from the training loop to support LR schedules.
    /// `weight_decay` is applied decoupled from the gradient direction.
    pub fn step(&mut self, model: &mut BilinearNet, grads: &mut Gradients, lr: f32, weight_decay: f32) {
        assert!(lr.is_finite() && lr > 0.0, "lr must be finite and > 0");
        assert!(
            weight_decay.is_finite() && weight_decay >= 0.0,
            "weight_decay must be finite and >= 0"
        );

        if weight_decay > 0.0 {
            model.scale_params(1.0 - lr * weight_decay);
        }

        match self {
            OptimizerState::Sgd => {
                model.sgd_step(grads, lr);
            }
            OptimizerState::AdamW {
                beta1,
                beta2,
                eps,
                t,
                beta1_pow,
                beta2_pow,
                m,
                v,
            } => {
                *t += 1;
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let one_minus_beta1 = 1.0 - *beta1;
                let one_minus_beta2 = 1.0 - *beta2;
                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                // Overwrite `grads` with the Adam direction, then reuse the
                // uniform parameter step.
                let groups = grads.param_groups_mut();
                debug_assert_eq!(groups.len(), m.len());
                for ((g, mg), vg) in groups.into_iter().zip(m.iter_mut()).zip(v.iter_mut()) {
                    debug_assert_eq!(g.len(), mg.len());
                    for i in 0..g.len() {
                        let grad = g[i];
                        mg[i] = (*beta1) * mg[i] + one_minus_beta1 * grad;
                        vg[i] = (*beta2) * vg[i] + one_minus_beta2 * (grad * grad);

                        let m_hat = mg[i] / corr1;
                        let v_hat = vg[i] / corr2;
                        g[i] = m_hat / (v_hat.sqrt() + *eps);
                    }
                }

                model.sgd_step(grads, lr);
            }
        }
    }
}

fn zeros_like_params(model: &BilinearNet) -> Vec<Vec<f32>> {
    Gradients::new(model)
        .param_groups()
        .into_iter()
        .map(|g| vec![0.0; g.len()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn tiny_net() -> BilinearNet {
        BilinearNet::new(Config {
            d_input: 2,
            d_hidden: 2,
            d_output: 2,
            n_layer: 1,
            bias: false,
            residual: false,
            seed: 0,
        })
        .unwrap()
    }

    #[test]
    fn validation_rejects_bad_hyperparams() {
        assert!(Optimizer::AdamW {
            beta1: 1.0,
            beta2: 0.999,
            eps: 1e-8
        }
        .validate()
        .is_err());
        assert!(Optimizer::AdamW {
            beta1: 0.9,
            beta2: 1.0,
            eps: 1e-8
        }
        .validate()
        .is_err());
        assert!(Optimizer::AdamW {
            beta1: 0.9,
            beta2: 0.999,
            eps: 0.0
        }
        .validate()
        .is_err());
        assert!(Optimizer::default().validate().is_ok());
    }

    #[test]
    fn adamw_first_step_matches_expected_direction_for_unit_grad() {
        let mut net = tiny_net();
        let mut grads = net.gradients();
        for g in grads.param_groups_mut() {
            g.fill(1.0);
        }

        let before: Vec<Vec<f32>> = net
            .param_groups_mut()
            .into_iter()
            .map(|p| p.to_vec())
            .collect();

        let mut opt = Optimizer::AdamW {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0,
        }
        .state(&net)
        .unwrap();
        opt.step(&mut net, &mut grads, 0.1, 0.0);

        // With eps=1.0 and unit grad, the first bias-corrected update is
        // 1/(1+eps) = 0.5 for every parameter.
        for (after, before) in net.param_groups_mut().into_iter().zip(before) {
            for (a, b) in after.iter().zip(before) {
                assert!((a - (b - 0.1 * 0.5)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn decoupled_weight_decay_scales_params() {
        let mut net = tiny_net();
        let mut grads = net.gradients();
        for g in grads.param_groups_mut() {
            g.fill(0.0);
        }

        let before: Vec<Vec<f32>> = net
            .param_groups_mut()
            .into_iter()
            .map(|p| p.to_vec())
            .collect();

        // With zero gradients, SGD + decay is a pure multiplicative shrink.
        let mut opt = Optimizer::Sgd.state(&net).unwrap();
        opt.step(&mut net, &mut grads, 0.1, 0.5);

        for (after, before) in net.param_groups_mut().into_iter().zip(before) {
            for (a, b) in after.iter().zip(before) {
                assert!((a - b * (1.0 - 0.1 * 0.5)).abs() < 1e-7);
            }
        }
    }
}
