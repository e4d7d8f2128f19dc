//! The bilinear layer.
//!
//! A bilinear layer computes an elementwise product of two separate linear
//! projections of the same input:
//!
//! - `u = L x + b_l`
//! - `v = R x + b_r`
//! - `y = u ⊙ v`
//!
//! The product is the only nonlinearity in the network, which is what makes
//! the closed-form decomposition in [`crate::decompose`] possible: every
//! output coordinate is an exact quadratic form in the layer input.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Bilinear {
    in_dim: usize,
    out_dim: usize,
    /// Row-major (out_dim, in_dim).
    left: Vec<f32>,
    /// Row-major (out_dim, in_dim).
    right: Vec<f32>,
    /// Both halves biased, or neither.
    left_bias: Option<Vec<f32>>,
    right_bias: Option<Vec<f32>>,
}

/// Parameter gradients for one `Bilinear` layer (overwrite semantics).
#[derive(Debug, Clone)]
pub struct BilinearGradients {
    pub(crate) d_left: Vec<f32>,
    pub(crate) d_right: Vec<f32>,
    pub(crate) d_left_bias: Option<Vec<f32>>,
    pub(crate) d_right_bias: Option<Vec<f32>>,
}

impl Bilinear {
    /// Gaussian init scaled by `1/sqrt(in_dim)` for both projections.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let scale = 1.0 / (in_dim as f32).sqrt();
        let mut draw = |n: usize| -> Vec<f32> {
            (0..n)
                .map(|_| rng.sample::<f32, _>(StandardNormal) * scale)
                .collect()
        };
        let left = draw(in_dim * out_dim);
        let right = draw(in_dim * out_dim);
        let (left_bias, right_bias) = if bias {
            (Some(vec![0.0; out_dim]), Some(vec![0.0; out_dim]))
        } else {
            (None, None)
        };
        Self {
            in_dim,
            out_dim,
            left,
            right,
            left_bias,
            right_bias,
        }
    }

    /// Rebuild a layer from raw parts, validating shape and finiteness.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        left: Vec<f32>,
        right: Vec<f32>,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "bilinear dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let expected = in_dim * out_dim;
        if left.len() != expected || right.len() != expected {
            return Err(Error::InvalidShape(format!(
                "left/right lengths {}/{} do not match out_dim * in_dim ({out_dim} * {in_dim})",
                left.len(),
                right.len()
            )));
        }
        if left.iter().chain(right.iter()).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "bilinear weights must contain only finite values".to_owned(),
            ));
        }
        Ok(Self {
            in_dim,
            out_dim,
            left,
            right,
            left_bias: None,
            right_bias: None,
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

    /// The left projection matrix, row-major (out_dim, in_dim).
    #[inline]
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    /// The right projection matrix, row-major (out_dim, in_dim).
    #[inline]
    pub fn right(&self) -> &[f32] {
        &self.right
    }

    #[inline]
    pub fn has_bias(&self) -> bool {
        self.left_bias.is_some()
    }

    /// All trainable parameter buffers at once (split borrows).
    #[allow(clippy::type_complexity)]
    #[inline]
    pub(crate) fn params_mut(
        &mut self,
    ) -> (&mut [f32], &mut [f32], Option<&mut [f32]>, Option<&mut [f32]>) {
        (
            &mut self.left,
            &mut self.right,
            self.left_bias.as_deref_mut(),
            self.right_bias.as_deref_mut(),
        )
    }

    /// Forward pass for a single sample.
    ///
    /// Writes the two half pre-products into `u` and `v`; `backward` needs
    /// both, so the caller keeps them in its scratch.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `u.len() == v.len() == outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f32], u: &mut [f32], v: &mut [f32], outputs: &mut [f32]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(u.len(), self.out_dim);
        debug_assert_eq!(v.len(), self.out_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for o in 0..self.out_dim {
            let row = o * self.in_dim;
            let mut lu = crate::linalg::dot(&self.left[row..row + self.in_dim], inputs);
            let mut rv = crate::linalg::dot(&self.right[row..row + self.in_dim], inputs);
            if let Some(bl) = &self.left_bias {
                lu += bl[o];
            }
            if let Some(br) = &self.right_bias {
                rv += br[o];
            }
            u[o] = lu;
            v[o] = rv;
            outputs[o] = lu * rv;
        }
    }

    /// Backward pass for a single sample (overwrite semantics).
    ///
    /// `u` and `v` are the half pre-products produced by `forward` for the
    /// same `inputs`. Writes `dL/d(inputs)` into `d_inputs` and parameter
    /// gradients into `grads`.
    #[inline]
    pub fn backward(
        &self,
        inputs: &[f32],
        u: &[f32],
        v: &[f32],
        d_outputs: &[f32],
        d_inputs: &mut [f32],
        grads: &mut BilinearGradients,
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(u.len(), self.out_dim);
        debug_assert_eq!(v.len(), self.out_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_inputs.len(), self.in_dim);
        debug_assert_eq!(grads.d_left.len(), self.left.len());
        debug_assert_eq!(grads.d_right.len(), self.right.len());

        // d_inputs accumulates contributions from both halves of every output.
        d_inputs.fill(0.0);

        for o in 0..self.out_dim {
            // y = u * v, so each half's gradient is gated by the other half.
            let d_u = d_outputs[o] * v[o];
            let d_v = d_outputs[o] * u[o];

            if let Some(dbl) = &mut grads.d_left_bias {
                dbl[o] = d_u;
            }
            if let Some(dbr) = &mut grads.d_right_bias {
                dbr[o] = d_v;
            }

            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                grads.d_left[row + i] = d_u * inputs[i];
                grads.d_right[row + i] = d_v * inputs[i];
                d_inputs[i] = self.left[row + i].mul_add(d_u, d_inputs[i]);
                d_inputs[i] = self.right[row + i].mul_add(d_v, d_inputs[i]);
            }
        }
    }
}

impl BilinearGradients {
    pub fn new(layer: &Bilinear) -> Self {
        let n = layer.in_dim * layer.out_dim;
        let bias_buf = || {
            if layer.has_bias() {
                Some(vec![0.0; layer.out_dim])
            } else {
                None
            }
        };
        Self {
            d_left: vec![0.0; n],
            d_right: vec![0.0; n],
            d_left_bias: bias_buf(),
            d_right_bias: bias_buf(),
        }
    }
}
