//! Contiguous dataset helpers.
//!
//! The training loop operates on slices to avoid per-step allocations.
//! `Inputs` and `Dataset` provide validated, row-major storage for
//! feature/target matrices; classification targets are stored one-hot.

use crate::{Error, Result};

/// A collection of input samples (X).
///
/// Stored as a contiguous buffer with row-major layout:
/// - `inputs.len() == len * input_dim`
#[derive(Debug, Clone)]
pub struct Inputs {
    inputs: Vec<f32>,
    len: usize,
    input_dim: usize,
}

impl Inputs {
    /// Build inputs from a flat buffer with shape `(len, input_dim)`.
    pub fn from_flat(inputs: Vec<f32>, input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidData("input_dim must be > 0".to_owned()));
        }
        if !inputs.len().is_multiple_of(input_dim) {
            return Err(Error::InvalidData(format!(
                "inputs length {} is not divisible by input_dim {}",
                inputs.len(),
                input_dim
            )));
        }

        let len = inputs.len() / input_dim;

        Ok(Self {
            inputs,
            len,
            input_dim,
        })
    }

    /// Build inputs from per-sample rows (copies into contiguous storage).
    pub fn from_rows(inputs: &[Vec<f32>]) -> Result<Self> {
        if inputs.is_empty() {
            return Err(Error::InvalidData("inputs must not be empty".to_owned()));
        }

        let input_dim = inputs[0].len();
        if input_dim == 0 {
            return Err(Error::InvalidData("input_dim must be > 0".to_owned()));
        }
        for (i, row) in inputs.iter().enumerate() {
            if row.len() != input_dim {
                return Err(Error::InvalidData(format!(
                    "input row {i} has len {}, expected {input_dim}",
                    row.len()
                )));
            }
        }

        let mut flat = Vec::with_capacity(inputs.len() * input_dim);
        for row in inputs {
            flat.extend_from_slice(row);
        }
        Self::from_flat(flat, input_dim)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Returns the `idx`-th input row (shape: `(input_dim,)`).
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn input(&self, idx: usize) -> &[f32] {
        let start = idx * self.input_dim;
        &self.inputs[start..start + self.input_dim]
    }
}

/// A supervised dataset: inputs (X) and one-hot targets (Y).
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Inputs,
    targets: Vec<f32>,
    target_dim: usize,
}

impl Dataset {
    /// Build a dataset from flat buffers.
    ///
    /// `inputs` is `(len, input_dim)` and `targets` is `(len, target_dim)`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_dim: usize,
        target_dim: usize,
    ) -> Result<Self> {
        let inputs = Inputs::from_flat(inputs, input_dim)?;
        if target_dim == 0 {
            return Err(Error::InvalidData("target_dim must be > 0".to_owned()));
        }
        if targets.len() != inputs.len() * target_dim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match len * target_dim ({} * {})",
                targets.len(),
                inputs.len(),
                target_dim
            )));
        }

        Ok(Self {
            inputs,
            targets,
            target_dim,
        })
    }

    /// Build a classification dataset from inputs and integer class labels.
    ///
    /// Labels are expanded to one-hot targets over `num_classes`.
    pub fn from_labels(
        inputs: Vec<f32>,
        labels: &[usize],
        input_dim: usize,
        num_classes: usize,
    ) -> Result<Self> {
        let inputs = Inputs::from_flat(inputs, input_dim)?;
        if num_classes == 0 {
            return Err(Error::InvalidData("num_classes must be > 0".to_owned()));
        }
        if labels.len() != inputs.len() {
            return Err(Error::InvalidData(format!(
                "labels length {} does not match number of samples {}",
                labels.len(),
                inputs.len()
            )));
        }

        let mut targets = vec![0.0_f32; labels.len() * num_classes];
        for (i, &label) in labels.iter().enumerate() {
            if label >= num_classes {
                return Err(Error::InvalidData(format!(
                    "label {label} at row {i} is out of range for {num_classes} classes"
                )));
            }
            targets[i * num_classes + label] = 1.0;
        }

        Ok(Self {
            inputs,
            targets,
            target_dim: num_classes,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.inputs.input_dim()
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    #[inline]
    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Returns the `idx`-th input row. Panics if `idx >= len`.
    #[inline]
    pub fn input(&self, idx: usize) -> &[f32] {
        self.inputs.input(idx)
    }

    /// Returns the `idx`-th target row. Panics if `idx >= len`.
    #[inline]
    pub fn target(&self, idx: usize) -> &[f32] {
        let start = idx * self.target_dim;
        &self.targets[start..start + self.target_dim]
    }
}
