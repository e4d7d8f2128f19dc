//! Symmetric eigendecomposition.
//!
//! A cyclic Jacobi eigensolver on flat row-major buffers. The rotations are
//! accumulated in `f64` on a copy of the input, so the `f32` results are
//! accurate to well below the crate's test tolerances.
//!
//! Contract: eigenvalues are returned in ASCENDING order. Callers that want
//! the "most important" directions must re-rank by `|eigenvalue|` explicitly
//! (see [`crate::decompose::truncate_by_magnitude`]); the ascending default
//! is never relied on implicitly for importance.

use crate::{Error, Result};

const MAX_SWEEPS: usize = 64;

/// Eigendecomposition of a symmetric `n x n` matrix.
///
/// Returns `(eigenvalues, eigenvectors)`:
/// - `eigenvalues` ascending, length `n`
/// - `eigenvectors` row-major `(n, n)`: `eigenvectors[k*n..(k+1)*n]` is the
///   unit-norm eigenvector paired with `eigenvalues[k]`
///
/// The input must be symmetric; the decomposition reads both triangles and
/// is meaningless otherwise. An all-zero (or rank-deficient) input is not
/// an error: the zero eigenvalues simply come back as zeros.
pub fn symmetric_eigh(a: &[f32], n: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    if n == 0 {
        return Err(Error::InvalidShape("matrix dimension must be > 0".to_owned()));
    }
    if a.len() != n * n {
        return Err(Error::InvalidShape(format!(
            "matrix length {} does not match n * n ({n} * {n})",
            a.len()
        )));
    }

    // Work in f64 on a copy.
    let mut m: Vec<f64> = a.iter().map(|&x| x as f64).collect();
    // Accumulated rotations; columns are eigenvectors.
    let mut v = vec![0.0_f64; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let frob: f64 = m.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tol = 1e-12 * frob.max(1.0);

    for _sweep in 0..MAX_SWEEPS {
        let mut off = 0.0_f64;
        for p in 0..n {
            for q in (p + 1)..n {
                off += m[p * n + q] * m[p * n + q];
            }
        }
        if off.sqrt() <= tol {
            break;
        }

        for p in 0..n - 1 {
            for q in (p + 1)..n {
                let apq = m[p * n + q];
                if apq.abs() <= tol * 1e-3 {
                    continue;
                }
                let app = m[p * n + p];
                let aqq = m[q * n + q];

                // Stable rotation angle: zeroes m[p][q].
                let theta = (aqq - app) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // A <- Jᵀ A J: rotate columns p,q then rows p,q.
                for k in 0..n {
                    let akp = m[k * n + p];
                    let akq = m[k * n + q];
                    m[k * n + p] = c * akp - s * akq;
                    m[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = m[p * n + k];
                    let aqk = m[q * n + k];
                    m[p * n + k] = c * apk - s * aqk;
                    m[q * n + k] = s * apk + c * aqk;
                }

                // V <- V J.
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    // Diagonal holds the eigenvalues; sort ascending and carry the columns.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        m[i * n + i]
            .partial_cmp(&m[j * n + j])
            .expect("jacobi iteration preserves finiteness")
    });

    let mut eigenvalues = Vec::with_capacity(n);
    let mut eigenvectors = vec![0.0_f32; n * n];
    for (rank, &col) in order.iter().enumerate() {
        eigenvalues.push(m[col * n + col] as f32);
        for i in 0..n {
            eigenvectors[rank * n + i] = v[i * n + col] as f32;
        }
    }

    Ok((eigenvalues, eigenvectors))
}
