//! Training loop.
//!
//! A "batteries included" `fit` over mini-batches with shuffling, a cosine
//! LR schedule, and AdamW. Internally it still uses the allocation-free
//! forward/backward via scratch buffers; per-batch gradients are averaged
//! into a second, reused `Gradients` buffer.

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{metrics, BilinearNet, Dataset, Error, Gradients, Loss, Optimizer, Result, Trainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Mini-batch shuffling policy.
pub enum Shuffle {
    /// Keep dataset order.
    None,
    /// Reshuffle every epoch with a seeded RNG.
    Seeded(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Learning-rate schedule, evaluated per epoch.
pub enum LrSchedule {
    Constant,
    /// Cosine annealing from `lr` toward zero over the full run.
    #[default]
    CosineAnnealing,
}

impl LrSchedule {
    #[inline]
    fn lr_at(self, base_lr: f32, epoch: usize, epochs: usize) -> f32 {
        match self {
            LrSchedule::Constant => base_lr,
            LrSchedule::CosineAnnealing => {
                base_lr * 0.5 * (1.0 + (PI * epoch as f32 / epochs as f32).cos())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub shuffle: Shuffle,
    pub lr_schedule: LrSchedule,
    pub optimizer: Optimizer,
    pub weight_decay: f32,
    pub loss: Loss,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            lr: 1e-3,
            batch_size: 2048,
            shuffle: Shuffle::Seeded(0),
            lr_schedule: LrSchedule::default(),
            optimizer: Optimizer::default(),
            weight_decay: 0.5,
            loss: Loss::SoftmaxCrossEntropy,
        }
    }
}

/// Mean loss and accuracy over a dataset (or an epoch).
#[derive(Debug, Clone, Copy)]
pub struct EvalReport {
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct EpochReport {
    pub train: EvalReport,
    pub val: Option<EvalReport>,
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: Vec<EpochReport>,
}

impl FitReport {
    /// Train loss of the final epoch.
    pub fn final_train_loss(&self) -> f32 {
        self.epochs.last().map(|e| e.train.loss).unwrap_or(f32::NAN)
    }
}

impl BilinearNet {
    /// Train the model on a dataset.
    ///
    /// Trailing samples that do not fill a whole batch are dropped each
    /// epoch, so every optimizer step averages over exactly
    /// `cfg.batch_size` samples.
    pub fn fit(
        &mut self,
        train: &Dataset,
        val: Option<&Dataset>,
        cfg: FitConfig,
    ) -> Result<FitReport> {
        self.check_dataset(train)?;
        if let Some(val) = val {
            self.check_dataset(val)?;
        }
        if cfg.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(cfg.lr.is_finite() && cfg.lr > 0.0) {
            return Err(Error::InvalidConfig("lr must be finite and > 0".to_owned()));
        }
        if cfg.batch_size == 0 || cfg.batch_size > train.len() {
            return Err(Error::InvalidConfig(format!(
                "batch_size {} must be in 1..={} (dataset size)",
                cfg.batch_size,
                train.len()
            )));
        }
        if !(cfg.weight_decay.is_finite() && cfg.weight_decay >= 0.0) {
            return Err(Error::InvalidConfig(
                "weight_decay must be finite and >= 0".to_owned(),
            ));
        }
        let mut opt = cfg.optimizer.state(self)?;

        let mut trainer = Trainer::new(self);
        let mut batch_grads = Gradients::new(self);
        let mut indices: Vec<usize> = (0..train.len()).collect();
        let mut shuffle_rng = match cfg.shuffle {
            Shuffle::None => None,
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
        };

        let num_batches = train.len() / cfg.batch_size;
        let samples_per_epoch = (num_batches * cfg.batch_size) as f32;
        let inv_batch = 1.0 / cfg.batch_size as f32;

        let mut epochs = Vec::with_capacity(cfg.epochs);
        for epoch in 0..cfg.epochs {
            if let Some(rng) = &mut shuffle_rng {
                indices.shuffle(rng);
            }
            let lr = cfg.lr_schedule.lr_at(cfg.lr, epoch, cfg.epochs);

            let mut epoch_loss = 0.0_f32;
            let mut epoch_acc = 0.0_f32;

            for batch in 0..num_batches {
                zero_param_grads(&mut batch_grads);

                for &idx in &indices[batch * cfg.batch_size..(batch + 1) * cfg.batch_size] {
                    let input = train.input(idx);
                    let target = train.target(idx);

                    self.forward(input, &mut trainer.scratch);
                    let logits = trainer.scratch.logits();
                    epoch_loss += cfg.loss.forward(logits, target);
                    epoch_acc += metrics::accuracy(logits, target);

                    cfg.loss
                        .backward(logits, target, trainer.grads.d_logits_mut());
                    self.backward(input, &trainer.scratch, &mut trainer.grads);
                    accumulate_param_grads(&mut batch_grads, &trainer.grads);
                }

                scale_param_grads(&mut batch_grads, inv_batch);
                opt.step(self, &mut batch_grads, lr, cfg.weight_decay);
            }

            let train_report = EvalReport {
                loss: epoch_loss / samples_per_epoch,
                accuracy: epoch_acc / samples_per_epoch,
            };
            let val_report = match val {
                Some(val) => Some(self.evaluate(val, cfg.loss)?),
                None => None,
            };
            epochs.push(EpochReport {
                train: train_report,
                val: val_report,
            });
        }

        Ok(FitReport { epochs })
    }

    /// Mean loss and accuracy over a dataset, without mutation.
    pub fn evaluate(&self, data: &Dataset, loss: Loss) -> Result<EvalReport> {
        self.check_dataset(data)?;

        let mut scratch = self.scratch();
        let mut total_loss = 0.0_f32;
        let mut total_acc = 0.0_f32;
        for idx in 0..data.len() {
            let logits = self.forward(data.input(idx), &mut scratch);
            total_loss += loss.forward(logits, data.target(idx));
            total_acc += metrics::accuracy(logits, data.target(idx));
        }
        Ok(EvalReport {
            loss: total_loss / data.len() as f32,
            accuracy: total_acc / data.len() as f32,
        })
    }

    /// Predict logits for all inputs.
    ///
    /// Returns a flat buffer with shape `(len, d_output)`.
    pub fn predict(&self, inputs: &crate::Inputs) -> Result<Vec<f32>> {
        if inputs.is_empty() {
            return Err(Error::InvalidData("inputs must not be empty".to_owned()));
        }
        if inputs.input_dim() != self.input_dim() {
            return Err(Error::InvalidData(format!(
                "inputs input_dim {} does not match model d_input {}",
                inputs.input_dim(),
                self.input_dim()
            )));
        }

        let mut scratch = self.scratch();
        let out_dim = self.output_dim();
        let mut preds = vec![0.0_f32; inputs.len() * out_dim];
        for idx in 0..inputs.len() {
            let y = self.forward(inputs.input(idx), &mut scratch);
            preds[idx * out_dim..(idx + 1) * out_dim].copy_from_slice(y);
        }
        Ok(preds)
    }

    fn check_dataset(&self, data: &Dataset) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }
        if data.input_dim() != self.input_dim() {
            return Err(Error::InvalidData(format!(
                "dataset input_dim {} does not match model d_input {}",
                data.input_dim(),
                self.input_dim()
            )));
        }
        if data.target_dim() != self.output_dim() {
            return Err(Error::InvalidData(format!(
                "dataset target_dim {} does not match model d_output {}",
                data.target_dim(),
                self.output_dim()
            )));
        }
        Ok(())
    }
}

fn zero_param_grads(grads: &mut Gradients) {
    for g in grads.param_groups_mut() {
        g.fill(0.0);
    }
}

fn accumulate_param_grads(acc: &mut Gradients, sample: &Gradients) {
    for (a, s) in acc.param_groups_mut().into_iter().zip(sample.param_groups()) {
        debug_assert_eq!(a.len(), s.len());
        for (av, &sv) in a.iter_mut().zip(s) {
            *av += sv;
        }
    }
}

fn scale_param_grads(grads: &mut Gradients, factor: f32) {
    for g in grads.param_groups_mut() {
        for v in g.iter_mut() {
            *v *= factor;
        }
    }
}
