//! Top-k sparse autoencoder.
//!
//! Trained separately from the classifier, the SAE provides two things the
//! analysis pipeline needs: ground-truth sparse feature activations (the
//! `Y` the correlation evaluator scores against) and per-feature decoder
//! directions (the probe rows the generalized decomposition consumes).
//!
//! Sparsity is enforced structurally: only the `k` largest pre-activations
//! survive the encoder, everything else is zeroed. Reconstruction trains
//! with MSE and Adam; decoder columns are renormalized to unit norm after
//! every step so feature magnitudes stay identified.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::correlate::SparseVec;
use crate::{Error, Inputs, Result};

#[derive(Debug, Clone, Copy)]
pub struct SaeConfig {
    /// Width of the activations being reconstructed.
    pub d_model: usize,
    /// Feature count multiplier: `d_features = expansion * d_model`.
    pub expansion: usize,
    /// Top-k sparsity; no other sparsity is supported.
    pub k: usize,
    pub seed: u64,
}

impl SaeConfig {
    pub fn new(d_model: usize) -> Self {
        Self {
            d_model,
            expansion: 4,
            k: 30,
            seed: 42,
        }
    }

    #[inline]
    pub fn d_features(&self) -> usize {
        self.expansion * self.d_model
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 || self.expansion == 0 {
            return Err(Error::InvalidConfig(
                "d_model and expansion must be > 0".to_owned(),
            ));
        }
        if self.k == 0 || self.k > self.d_features() {
            return Err(Error::InvalidConfig(format!(
                "k {} must be in 1..={} (d_features)",
                self.k,
                self.d_features()
            )));
        }
        Ok(())
    }
}

/// Training hyperparameters for [`TopKSae::fit`].
#[derive(Debug, Clone, Copy)]
pub struct SaeFitConfig {
    pub epochs: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub shuffle_seed: u64,
}

impl Default for SaeFitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            lr: 1e-4,
            batch_size: 256,
            shuffle_seed: 0,
        }
    }
}

/// An end-to-end top-k sparse autoencoder.
#[derive(Debug, Clone)]
pub struct TopKSae {
    d_model: usize,
    d_features: usize,
    k: usize,
    /// Row-major (d_features, d_model).
    w_enc: Vec<f32>,
    /// Row-major (d_model, d_features); column `j` is feature `j`'s
    /// decoder direction, kept unit-norm.
    w_dec: Vec<f32>,
    b_dec: Vec<f32>,
}

/// Reusable buffers for encode/decode.
#[derive(Debug, Clone)]
pub struct SaeScratch {
    centered: Vec<f32>,
    features: Vec<f32>,
    recon: Vec<f32>,
    order: Vec<usize>,
}

impl TopKSae {
    pub fn new(config: SaeConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (d_model, d_features) = (config.d_model, config.d_features());

        // Decoder first: Gaussian columns normalized to unit norm, encoder
        // initialized as its transpose (tied init).
        let mut w_dec: Vec<f32> = (0..d_model * d_features)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        normalize_decoder_columns(&mut w_dec, d_model, d_features);

        let mut w_enc = vec![0.0_f32; d_features * d_model];
        for i in 0..d_model {
            for j in 0..d_features {
                w_enc[j * d_model + i] = w_dec[i * d_features + j];
            }
        }

        Ok(Self {
            d_model,
            d_features,
            k: config.k,
            w_enc,
            w_dec,
            b_dec: vec![0.0; d_model],
        })
    }

    #[inline]
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    #[inline]
    pub fn d_features(&self) -> usize {
        self.d_features
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn scratch(&self) -> SaeScratch {
        SaeScratch {
            centered: vec![0.0; self.d_model],
            features: vec![0.0; self.d_features],
            recon: vec![0.0; self.d_model],
            order: (0..self.d_features).collect(),
        }
    }

    /// Per-feature decoder directions, row-major (d_features, d_model).
    ///
    /// Row `f` is the direction feature `f` writes into model space; these
    /// are the probe rows for [`crate::decompose::decompose_directions`].
    pub fn decoder_directions(&self) -> Vec<f32> {
        let mut rows = vec![0.0_f32; self.d_features * self.d_model];
        for i in 0..self.d_model {
            for j in 0..self.d_features {
                rows[j * self.d_model + i] = self.w_dec[i * self.d_features + j];
            }
        }
        rows
    }

    /// Top-k encode: returns the sparse feature vector (dense storage, at
    /// most `k` non-zeros).
    pub fn encode<'a>(&self, x: &[f32], scratch: &'a mut SaeScratch) -> &'a [f32] {
        assert_eq!(
            x.len(),
            self.d_model,
            "input len {} does not match d_model {}",
            x.len(),
            self.d_model
        );

        for i in 0..self.d_model {
            scratch.centered[i] = x[i] - self.b_dec[i];
        }
        for j in 0..self.d_features {
            let row = j * self.d_model;
            scratch.features[j] =
                crate::linalg::dot(&self.w_enc[row..row + self.d_model], &scratch.centered);
        }

        // Keep the k largest pre-activations, zero the rest.
        if self.k < self.d_features {
            let features = &scratch.features;
            scratch.order.sort_unstable_by(|&a, &b| {
                features[b]
                    .partial_cmp(&features[a])
                    .expect("encoder output is finite")
            });
            for &j in &scratch.order[self.k..] {
                scratch.features[j] = 0.0;
            }
        }

        &scratch.features
    }

    /// Decode a feature vector back to model space.
    pub fn decode(&self, features: &[f32], out: &mut [f32]) {
        assert_eq!(features.len(), self.d_features);
        assert_eq!(out.len(), self.d_model);

        for i in 0..self.d_model {
            let row = i * self.d_features;
            out[i] = crate::linalg::dot(&self.w_dec[row..row + self.d_features], features)
                + self.b_dec[i];
        }
    }

    /// Encode then decode; the reconstruction lives in `scratch`.
    pub fn forward<'a>(&self, x: &[f32], scratch: &'a mut SaeScratch) -> &'a [f32] {
        self.encode(x, scratch);
        for i in 0..self.d_model {
            let row = i * self.d_features;
            scratch.recon[i] =
                crate::linalg::dot(&self.w_dec[row..row + self.d_features], &scratch.features)
                    + self.b_dec[i];
        }
        &scratch.recon
    }

    /// Record every feature's non-zero activations over a token stream.
    ///
    /// Returns one [`SparseVec`] per feature: the ground-truth `Y` for the
    /// correlation evaluator, stored non-zero-only.
    pub fn feature_activations(&self, acts: &Inputs) -> Result<Vec<SparseVec>> {
        if acts.input_dim() != self.d_model {
            return Err(Error::InvalidData(format!(
                "activations dim {} does not match d_model {}",
                acts.input_dim(),
                self.d_model
            )));
        }

        let mut scratch = self.scratch();
        let mut truth: Vec<SparseVec> = (0..self.d_features).map(|_| SparseVec::new()).collect();
        for t in 0..acts.len() {
            let features = self.encode(acts.input(t), &mut scratch);
            for (j, &v) in features.iter().enumerate() {
                if v != 0.0 {
                    truth[j].push(t, v);
                }
            }
        }
        Ok(truth)
    }

    /// Train the autoencoder to reconstruct `acts` (MSE, Adam).
    ///
    /// Returns the mean reconstruction loss per epoch. Decoder columns are
    /// renormalized after every optimizer step.
    pub fn fit(&mut self, acts: &Inputs, cfg: SaeFitConfig) -> Result<Vec<f32>> {
        if acts.is_empty() {
            return Err(Error::InvalidData("activations must not be empty".to_owned()));
        }
        if acts.input_dim() != self.d_model {
            return Err(Error::InvalidData(format!(
                "activations dim {} does not match d_model {}",
                acts.input_dim(),
                self.d_model
            )));
        }
        if cfg.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(cfg.lr.is_finite() && cfg.lr > 0.0) {
            return Err(Error::InvalidConfig("lr must be finite and > 0".to_owned()));
        }
        if cfg.batch_size == 0 || cfg.batch_size > acts.len() {
            return Err(Error::InvalidConfig(format!(
                "batch_size {} must be in 1..={} (token count)",
                cfg.batch_size,
                acts.len()
            )));
        }

        let mut scratch = self.scratch();
        let mut adam = Adam::new(&[self.w_enc.len(), self.w_dec.len(), self.b_dec.len()]);

        // Per-batch gradient accumulators and per-sample backprop buffers.
        let mut g_enc = vec![0.0_f32; self.w_enc.len()];
        let mut g_dec = vec![0.0_f32; self.w_dec.len()];
        let mut g_b = vec![0.0_f32; self.d_model];
        let mut d_recon = vec![0.0_f32; self.d_model];
        let mut d_features = vec![0.0_f32; self.d_features];
        let mut d_centered = vec![0.0_f32; self.d_model];

        let mut indices: Vec<usize> = (0..acts.len()).collect();
        let mut rng = StdRng::seed_from_u64(cfg.shuffle_seed);
        let num_batches = acts.len() / cfg.batch_size;
        let inv_batch = 1.0 / cfg.batch_size as f32;

        let mut epoch_losses = Vec::with_capacity(cfg.epochs);
        for _epoch in 0..cfg.epochs {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0_f32;

            for batch in 0..num_batches {
                g_enc.fill(0.0);
                g_dec.fill(0.0);
                g_b.fill(0.0);

                for &t in &indices[batch * cfg.batch_size..(batch + 1) * cfg.batch_size] {
                    let x = acts.input(t);
                    self.forward(x, &mut scratch);
                    epoch_loss += crate::loss::mse_backward(&scratch.recon, x, &mut d_recon);

                    // Decode path: d_w_dec = d_recon ⊗ features, and the
                    // bias sees d_recon directly.
                    for i in 0..self.d_model {
                        let d = d_recon[i];
                        g_b[i] += d;
                        if d != 0.0 {
                            let row = i * self.d_features;
                            for j in 0..self.d_features {
                                // Masked features are zero, so their decoder
                                // columns get no gradient here.
                                g_dec[row + j] += d * scratch.features[j];
                            }
                        }
                    }

                    // Through the top-k mask: only surviving features
                    // propagate.
                    for j in 0..self.d_features {
                        if scratch.features[j] != 0.0 {
                            let mut acc = 0.0_f32;
                            for i in 0..self.d_model {
                                acc += self.w_dec[i * self.d_features + j] * d_recon[i];
                            }
                            d_features[j] = acc;
                        } else {
                            d_features[j] = 0.0;
                        }
                    }

                    // Encode path.
                    d_centered.fill(0.0);
                    for j in 0..self.d_features {
                        let d = d_features[j];
                        if d == 0.0 {
                            continue;
                        }
                        let row = j * self.d_model;
                        for i in 0..self.d_model {
                            g_enc[row + i] += d * scratch.centered[i];
                            d_centered[i] += self.w_enc[row + i] * d;
                        }
                    }
                    // b_dec is subtracted before the encoder.
                    for i in 0..self.d_model {
                        g_b[i] -= d_centered[i];
                    }
                }

                for g in [&mut g_enc[..], &mut g_dec[..], &mut g_b[..]] {
                    for v in g.iter_mut() {
                        *v *= inv_batch;
                    }
                }
                adam.step(
                    &mut [&mut self.w_enc, &mut self.w_dec, &mut self.b_dec],
                    &[&g_enc, &g_dec, &g_b],
                    cfg.lr,
                );
                normalize_decoder_columns(&mut self.w_dec, self.d_model, self.d_features);
            }

            epoch_losses.push(epoch_loss / (num_batches * cfg.batch_size) as f32);
        }

        Ok(epoch_losses)
    }
}

/// Scale every decoder column to unit norm.
fn normalize_decoder_columns(w_dec: &mut [f32], d_model: usize, d_features: usize) {
    for j in 0..d_features {
        let mut norm_sq = 0.0_f32;
        for i in 0..d_model {
            let v = w_dec[i * d_features + j];
            norm_sq = v.mul_add(v, norm_sq);
        }
        let norm = norm_sq.sqrt();
        if norm > 0.0 {
            let inv = 1.0 / norm;
            for i in 0..d_model {
                w_dec[i * d_features + j] *= inv;
            }
        }
    }
}

/// Minimal Adam over a fixed set of parameter buffers.
#[derive(Debug, Clone)]
struct Adam {
    t: u64,
    beta1_pow: f32,
    beta2_pow: f32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    const BETA1: f32 = 0.9;
    const BETA2: f32 = 0.999;
    const EPS: f32 = 1e-8;

    fn new(sizes: &[usize]) -> Self {
        Self {
            t: 0,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
            m: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            v: sizes.iter().map(|&n| vec![0.0; n]).collect(),
        }
    }

    fn step(&mut self, params: &mut [&mut Vec<f32>], grads: &[&Vec<f32>], lr: f32) {
        self.t += 1;
        self.beta1_pow *= Self::BETA1;
        self.beta2_pow *= Self::BETA2;
        let corr1 = 1.0 - self.beta1_pow;
        let corr2 = 1.0 - self.beta2_pow;

        for (idx, (p, g)) in params.iter_mut().zip(grads).enumerate() {
            let (m, v) = (&mut self.m[idx], &mut self.v[idx]);
            for i in 0..p.len() {
                let grad = g[i];
                m[i] = Self::BETA1 * m[i] + (1.0 - Self::BETA1) * grad;
                v[i] = Self::BETA2 * v[i] + (1.0 - Self::BETA2) * grad * grad;
                let m_hat = m[i] / corr1;
                let v_hat = v[i] / corr2;
                p[i] -= lr * m_hat / (v_hat.sqrt() + Self::EPS);
            }
        }
    }
}
