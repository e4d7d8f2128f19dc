use rand::Rng;
use rand_distr::StandardNormal;

use crate::{Error, Result};

/// A dense projection without bias: `y = W x`.
///
/// The embedding and unembedding of a [`crate::BilinearNet`] are plain
/// projections; the bilinear blocks between them carry the nonlinearity.
#[derive(Debug, Clone)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f32>,
}

impl Linear {
    /// Gaussian init scaled by `1/sqrt(in_dim)`.
    pub fn new_with_rng<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let scale = 1.0 / (in_dim as f32).sqrt();
        let weights = (0..in_dim * out_dim)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * scale)
            .collect();
        Self {
            in_dim,
            out_dim,
            weights,
        }
    }

    /// Rebuild a layer from raw parts, validating shape and finiteness.
    pub fn from_parts(in_dim: usize, out_dim: usize, weights: Vec<f32>) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        if weights.len() != in_dim * out_dim {
            return Err(Error::InvalidShape(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if weights.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "weights must contain only finite values".to_owned(),
            ));
        }
        Ok(Self {
            in_dim,
            out_dim,
            weights,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// Forward pass for a single sample.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f32], outputs: &mut [f32]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for o in 0..self.out_dim {
            let row = o * self.in_dim;
            outputs[o] = crate::linalg::dot(&self.weights[row..row + self.in_dim], inputs);
        }
    }

    /// Backward pass for a single sample (overwrite semantics).
    ///
    /// Writes `dL/d(inputs)` into `d_inputs` and `dL/dW` into `d_weights`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `d_outputs.len() == self.out_dim`
    /// - `d_inputs.len() == self.in_dim`
    /// - `d_weights.len() == self.weights.len()`
    #[inline]
    pub fn backward(
        &self,
        inputs: &[f32],
        d_outputs: &[f32],
        d_inputs: &mut [f32],
        d_weights: &mut [f32],
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_inputs.len(), self.in_dim);
        debug_assert_eq!(d_weights.len(), self.weights.len());

        // d_inputs accumulates contributions from all outputs.
        d_inputs.fill(0.0);

        for o in 0..self.out_dim {
            let d_z = d_outputs[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                d_weights[row + i] = d_z * inputs[i];
                d_inputs[i] = self.weights[row + i].mul_add(d_z, d_inputs[i]);
            }
        }
    }
}
