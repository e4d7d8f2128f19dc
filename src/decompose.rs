//! Bilinear decomposition engine.
//!
//! A bilinear layer followed by a linear readout is an exact quadratic form
//! per output: `logit_c(x) = xᵀ B_c x` with the interaction matrix
//! `B_c[i,j] = Σ_o W_u[c,o] · L[o,i] · R[o,j]`. Symmetrizing `B_c` (which
//! leaves the quadratic form unchanged) makes it eigendecomposable with real
//! eigenvalues, and each eigenvector is an input direction whose squared
//! activation contributes its eigenvalue to the output.
//!
//! The same construction generalizes from class readout rows to arbitrary
//! probe directions (e.g. sparse-autoencoder decoder rows); the truncated
//! variant keeps only the top-k directions by |eigenvalue| and is what the
//! correlation evaluator in [`crate::correlate`] consumes.

use crate::eigen::symmetric_eigh;
use crate::linalg::gemm_f32;
use crate::{BilinearNet, Error, Result};

/// Interaction tensor `B[c,i,j] = Σ_o w_u[c,o]·l[o,i]·r[o,j]`, symmetrized
/// over the last two axes.
///
/// Shapes (all row-major): `w_u (classes, hidden)`, `l (hidden, hidden)`,
/// `r (hidden, hidden)`. Returns `(classes, hidden, hidden)`.
///
/// Fails with a shape error before any computation; an all-zero result is
/// not an error (its eigendecomposition is all-zero too).
pub fn interaction_tensor(
    w_u: &[f32],
    classes: usize,
    l: &[f32],
    r: &[f32],
    hidden: usize,
) -> Result<Vec<f32>> {
    check_interaction_shapes(w_u, classes, l, r, hidden)?;

    let h = hidden;
    let mut b = vec![0.0_f32; classes * h * h];
    // Scratch for diag(w_u[c]) @ R, reused across classes.
    let mut wr = vec![0.0_f32; h * h];

    for c in 0..classes {
        let w_row = &w_u[c * h..(c + 1) * h];
        for o in 0..h {
            let w = w_row[o];
            for j in 0..h {
                wr[o * h + j] = w * r[o * h + j];
            }
        }

        // B_c = Lᵀ @ (diag(w) R): transpose L via swapped strides.
        let bc = &mut b[c * h * h..(c + 1) * h * h];
        gemm_f32(h, h, h, 1.0, l, 1, h, &wr, h, 1, 0.0, bc, h, 1);

        // Symmetrize: B ← 0.5 (B + Bᵗ). The eigendecomposition assumes a
        // symmetric input; the quadratic form itself is unchanged.
        for i in 0..h {
            for j in (i + 1)..h {
                let avg = 0.5 * (bc[i * h + j] + bc[j * h + i]);
                bc[i * h + j] = avg;
                bc[j * h + i] = avg;
            }
        }
    }

    Ok(b)
}

/// Per-class eigendecomposition of a bilinear layer, projected to input space.
#[derive(Debug, Clone)]
pub struct Decomposition {
    classes: usize,
    hidden: usize,
    d_input: usize,
    /// `(classes, hidden)`, ascending per class.
    eigenvalues: Vec<f32>,
    /// `(classes, hidden, d_input)`: eigenvector `k` of class `c`, mapped
    /// through `W_e` into input space.
    eigenvectors: Vec<f32>,
}

impl Decomposition {
    #[inline]
    pub fn classes(&self) -> usize {
        self.classes
    }

    #[inline]
    pub fn hidden(&self) -> usize {
        self.hidden
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.d_input
    }

    /// Eigenvalues of class `c`, ascending.
    #[inline]
    pub fn eigenvalues(&self, c: usize) -> &[f32] {
        &self.eigenvalues[c * self.hidden..(c + 1) * self.hidden]
    }

    /// Input-space eigenvector `k` of class `c`.
    #[inline]
    pub fn eigenvector(&self, c: usize, k: usize) -> &[f32] {
        let start = (c * self.hidden + k) * self.d_input;
        &self.eigenvectors[start..start + self.d_input]
    }
}

/// Decompose a bilinear layer into per-class eigenvalues and input-space
/// eigenvectors.
///
/// Steps, in order: interaction tensor, symmetrization, per-class
/// eigendecomposition (ascending eigenvalues), projection through `w_e`
/// (`(hidden, d_input)` row-major).
pub fn decompose(
    w_u: &[f32],
    classes: usize,
    l: &[f32],
    r: &[f32],
    hidden: usize,
    w_e: &[f32],
    d_input: usize,
) -> Result<Decomposition> {
    if d_input == 0 {
        return Err(Error::InvalidShape("d_input must be > 0".to_owned()));
    }
    if w_e.len() != hidden * d_input {
        return Err(Error::InvalidShape(format!(
            "w_e length {} does not match hidden * d_input ({hidden} * {d_input})",
            w_e.len()
        )));
    }

    let b = interaction_tensor(w_u, classes, l, r, hidden)?;

    let h = hidden;
    let mut eigenvalues = Vec::with_capacity(classes * h);
    let mut eigenvectors = vec![0.0_f32; classes * h * d_input];
    for c in 0..classes {
        let (vals, vecs) = symmetric_eigh(&b[c * h * h..(c + 1) * h * h], h)?;
        eigenvalues.extend_from_slice(&vals);

        // Project all h eigenvectors (rows of `vecs`) through w_e at once.
        let out = &mut eigenvectors[c * h * d_input..(c + 1) * h * d_input];
        gemm_f32(h, d_input, h, 1.0, &vecs, h, 1, w_e, d_input, 1, 0.0, out, d_input, 1);
    }

    Ok(Decomposition {
        classes,
        hidden,
        d_input,
        eigenvalues,
        eigenvectors,
    })
}

impl BilinearNet {
    /// Closed-form decomposition of this model's bilinear block.
    ///
    /// Only exact for a single-block model without block biases; anything
    /// else is rejected rather than silently decomposing one layer of a
    /// deeper network.
    pub fn decompose(&self) -> Result<Decomposition> {
        if self.num_blocks() != 1 {
            return Err(Error::InvalidConfig(format!(
                "decompose requires a single bilinear block, model has {}",
                self.num_blocks()
            )));
        }
        let block = self.block(0).expect("block count checked above");
        if block.has_bias() {
            return Err(Error::InvalidConfig(
                "decompose requires bias-free bilinear blocks".to_owned(),
            ));
        }
        decompose(
            self.w_u(),
            self.output_dim(),
            block.left(),
            block.right(),
            self.hidden_dim(),
            self.w_e(),
            self.input_dim(),
        )
    }
}

/// Keep the `k` eigenpairs of largest |eigenvalue|.
///
/// This is the explicit re-ranking step: both strongly positive and
/// strongly negative curvature directions matter, so selection is by
/// magnitude, descending, with a stable tie-break. Input is one spectrum
/// (`vals` length `n`, `vecs` row-major `(n, n)` as produced by
/// [`symmetric_eigh`]).
pub fn truncate_by_magnitude(
    vals: &[f32],
    vecs: &[f32],
    n: usize,
    k: usize,
) -> (Vec<f32>, Vec<f32>) {
    assert_eq!(vals.len(), n, "vals length {} does not match n {n}", vals.len());
    assert_eq!(
        vecs.len(),
        n * n,
        "vecs length {} does not match n * n ({n} * {n})",
        vecs.len()
    );
    assert!(k <= n, "k {k} must not exceed n {n}");

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        vals[j]
            .abs()
            .partial_cmp(&vals[i].abs())
            .expect("eigenvalues are finite")
    });
    order.truncate(k);

    let mut top_vals = Vec::with_capacity(k);
    let mut top_vecs = Vec::with_capacity(k * n);
    for &idx in &order {
        top_vals.push(vals[idx]);
        top_vecs.extend_from_slice(&vecs[idx * n..(idx + 1) * n]);
    }
    (top_vals, top_vecs)
}

/// Truncated per-feature eigenbasis in hidden space.
///
/// Produced by [`decompose_directions`]; consumed by
/// [`crate::correlate::evaluate`]. Layout (row-major):
/// - `eigenvalues (features, k)`, per feature sorted by |eigenvalue|
///   descending
/// - `eigenvectors (features, k, hidden)`
#[derive(Debug, Clone)]
pub struct TruncatedEigenbasis {
    pub(crate) features: usize,
    pub(crate) hidden: usize,
    pub(crate) k: usize,
    pub(crate) eigenvalues: Vec<f32>,
    pub(crate) eigenvectors: Vec<f32>,
}

impl TruncatedEigenbasis {
    #[inline]
    pub fn features(&self) -> usize {
        self.features
    }

    #[inline]
    pub fn hidden(&self) -> usize {
        self.hidden
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Eigenvalues of feature `f`, |descending|.
    #[inline]
    pub fn eigenvalues(&self, f: usize) -> &[f32] {
        &self.eigenvalues[f * self.k..(f + 1) * self.k]
    }

    /// Hidden-space eigenvector `j` of feature `f`.
    #[inline]
    pub fn eigenvector(&self, f: usize, j: usize) -> &[f32] {
        let start = (f * self.k + j) * self.hidden;
        &self.eigenvectors[start..start + self.hidden]
    }
}

/// Generalized decomposition: one truncated spectrum per probe direction.
///
/// `directions` is `(features, hidden)` row-major; each row plays the role
/// a `W_u` class row plays in [`decompose`]. Features are processed one at
/// a time so memory stays bounded by one `(hidden, hidden)` matrix
/// regardless of the feature count.
pub fn decompose_directions(
    directions: &[f32],
    features: usize,
    l: &[f32],
    r: &[f32],
    hidden: usize,
    k: usize,
) -> Result<TruncatedEigenbasis> {
    if k == 0 || k > hidden {
        return Err(Error::InvalidConfig(format!(
            "k {k} must be in 1..={hidden} (hidden dim)"
        )));
    }
    check_interaction_shapes(directions, features, l, r, hidden)?;

    let h = hidden;
    let mut eigenvalues = Vec::with_capacity(features * k);
    let mut eigenvectors = Vec::with_capacity(features * k * h);
    for f in 0..features {
        let b = interaction_tensor(&directions[f * h..(f + 1) * h], 1, l, r, h)?;
        let (vals, vecs) = symmetric_eigh(&b, h)?;
        let (top_vals, top_vecs) = truncate_by_magnitude(&vals, &vecs, h, k);
        eigenvalues.extend_from_slice(&top_vals);
        eigenvectors.extend_from_slice(&top_vecs);
    }

    Ok(TruncatedEigenbasis {
        features,
        hidden,
        k,
        eigenvalues,
        eigenvectors,
    })
}

fn check_interaction_shapes(
    w_u: &[f32],
    classes: usize,
    l: &[f32],
    r: &[f32],
    hidden: usize,
) -> Result<()> {
    if hidden == 0 || classes == 0 {
        return Err(Error::InvalidShape(
            "classes and hidden must be > 0".to_owned(),
        ));
    }
    if w_u.len() != classes * hidden {
        return Err(Error::InvalidShape(format!(
            "w_u length {} does not match classes * hidden ({classes} * {hidden})",
            w_u.len()
        )));
    }
    if l.len() != hidden * hidden {
        return Err(Error::InvalidShape(format!(
            "left matrix length {} does not match hidden * hidden ({hidden} * {hidden})",
            l.len()
        )));
    }
    if r.len() != hidden * hidden {
        return Err(Error::InvalidShape(format!(
            "right matrix length {} does not match hidden * hidden ({hidden} * {hidden})",
            r.len()
        )));
    }
    Ok(())
}
