//! End-to-end checks of the decomposition engine and the correlation
//! evaluator, on constructed weights where every quantity has a closed
//! form.

use bilinear_mlp::correlate::{self, CorrelateConfig, SparseVec};
use bilinear_mlp::{
    decompose, decompose_directions, interaction_tensor, symmetric_eigh, truncate_by_magnitude,
};

fn identity(n: usize) -> Vec<f32> {
    let mut m = vec![0.0_f32; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

fn seeded_matrix(n: usize, scale: f32) -> Vec<f32> {
    // Deterministic, non-symmetric test weights.
    (0..n * n)
        .map(|i| {
            let x = ((i * 2654435761) % 1000) as f32 / 1000.0 - 0.5;
            x * scale
        })
        .collect()
}

#[test]
fn identity_weights_yield_unit_eigenpair() {
    // L = R = W_e = I, W_u rows e0 and e1. Class 0's interaction matrix is
    // diag(1,0,0,0); its spectrum is one unit eigenvalue on e0.
    let h = 4;
    let eye = identity(h);
    let w_u = [
        1.0_f32, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0,
    ];

    let dec = decompose(&w_u, 2, &eye, &eye, h, &eye, h).unwrap();

    for c in 0..2 {
        let vals = dec.eigenvalues(c);
        assert!((vals[h - 1] - 1.0).abs() < 1e-5);
        for &v in &vals[..h - 1] {
            assert!(v.abs() < 1e-5);
        }

        let top = dec.eigenvector(c, h - 1);
        for (i, &v) in top.iter().enumerate() {
            let expect = if i == c { 1.0 } else { 0.0 };
            assert!((v.abs() - expect).abs() < 1e-5);
        }
    }
}

#[test]
fn interaction_tensor_is_exactly_symmetric() {
    let h = 6;
    let l = seeded_matrix(h, 1.0);
    let r = seeded_matrix(h, 0.7);
    let w_u = vec![0.5_f32; 3 * h];

    let b = interaction_tensor(&w_u, 3, &l, &r, h).unwrap();
    for c in 0..3 {
        let bc = &b[c * h * h..(c + 1) * h * h];
        for i in 0..h {
            for j in 0..h {
                assert_eq!(bc[i * h + j], bc[j * h + i]);
            }
        }
    }
}

#[test]
fn spectrum_reconstructs_and_is_orthonormal() {
    let h = 6;
    let l = seeded_matrix(h, 1.0);
    let r = seeded_matrix(h, 0.7);
    let w_u: Vec<f32> = (0..h).map(|i| 0.25 * (i as f32 + 1.0)).collect();

    let b = interaction_tensor(&w_u, 1, &l, &r, h).unwrap();
    let (vals, vecs) = symmetric_eigh(&b, h).unwrap();

    // Round trip: Σ_k λ_k v_k ⊗ v_k == B within tolerance.
    let mut back = vec![0.0_f32; h * h];
    for k in 0..h {
        let vk = &vecs[k * h..(k + 1) * h];
        for i in 0..h {
            for j in 0..h {
                back[i * h + j] += vals[k] * vk[i] * vk[j];
            }
        }
    }
    let scale: f32 = b.iter().map(|x| x.abs()).fold(0.0, f32::max).max(1.0);
    for (x, y) in b.iter().zip(&back) {
        assert!((x - y).abs() / scale < 1e-5, "{x} vs {y}");
    }

    // Orthonormality.
    for i in 0..h {
        for j in 0..h {
            let dot: f32 = (0..h).map(|p| vecs[i * h + p] * vecs[j * h + p]).sum();
            let expect = if i == j { 1.0 } else { 0.0 };
            assert!((dot - expect).abs() < 1e-5);
        }
    }
}

#[test]
fn full_rank_approximation_recovers_exact_quadratic_form() {
    // Ground truth built from the same closed form the basis encodes: with
    // all hidden directions kept, the cumulative approximation at the last
    // rank must match the true bilinear readout exactly, so the mean
    // correlation curve ends at 1.
    let h = 5;
    let features = 3;
    let tokens = 40;

    let l = seeded_matrix(h, 0.8);
    let r = seeded_matrix(h, 0.6);
    let directions: Vec<f32> = (0..features * h)
        .map(|i| if i % 3 == 0 { 1.0 } else { -0.5 })
        .collect();

    let basis = decompose_directions(&directions, features, &l, &r, h, h).unwrap();

    // Activation stream.
    let acts: Vec<f32> = (0..tokens * h)
        .map(|i| ((i * 40503) % 997) as f32 / 997.0 - 0.5)
        .collect();

    // True readout per feature: y[f,t] = Σ_o dir[f,o] * (Lx)_o * (Rx)_o.
    let mut truth = Vec::with_capacity(features);
    for f in 0..features {
        let mut row = SparseVec::new();
        for t in 0..tokens {
            let x = &acts[t * h..(t + 1) * h];
            let mut y = 0.0_f32;
            for o in 0..h {
                let lo: f32 = (0..h).map(|i| l[o * h + i] * x[i]).sum();
                let ro: f32 = (0..h).map(|i| r[o * h + i] * x[i]).sum();
                y += directions[f * h + o] * lo * ro;
            }
            if y != 0.0 {
                row.push(t, y);
            }
        }
        truth.push(row);
    }

    let report = correlate::evaluate(
        &basis,
        &acts,
        tokens,
        &truth,
        CorrelateConfig {
            min_nnz: 10,
            report_rank: h - 1,
        },
    )
    .unwrap();

    let last = *report.mean_by_rank.last().unwrap();
    assert!((last - 1.0).abs() < 1e-3, "last-rank mean corr {last}");
    assert!(last >= report.mean_by_rank[0] - 1e-3);

    // Every reported correlation is a real value in bounds.
    for rec in &report.records {
        assert!((-1.0..=1.0).contains(&rec.correlation));
        assert!(rec.nonzero_count > 10);
    }
}

#[test]
fn truncated_basis_orders_by_magnitude() {
    let h = 5;
    let l = seeded_matrix(h, 0.8);
    let r = seeded_matrix(h, 0.6);
    let direction: Vec<f32> = (0..h).map(|i| (i as f32) - 2.0).collect();

    let b = interaction_tensor(&direction, 1, &l, &r, h).unwrap();
    let (vals, vecs) = symmetric_eigh(&b, h).unwrap();
    let (top_vals, _) = truncate_by_magnitude(&vals, &vecs, h, 3);

    for w in top_vals.windows(2) {
        assert!(w[0].abs() >= w[1].abs());
    }
    // The dropped eigenvalues are all no larger in magnitude.
    let kept_min = top_vals.iter().map(|v| v.abs()).fold(f32::MAX, f32::min);
    let mut all = vals.clone();
    all.sort_by(|a, b| b.abs().partial_cmp(&a.abs()).unwrap());
    for &dropped in &all[3..] {
        assert!(dropped.abs() <= kept_min + 1e-6);
    }
}

#[test]
fn masked_approximation_vanishes_off_support() {
    let h = 3;
    let eye = identity(h);
    let basis = decompose_directions(&[1.0, 0.5, -0.25], 1, &eye, &eye, h, h).unwrap();

    let tokens = 6;
    let acts: Vec<f32> = (0..tokens * h).map(|i| i as f32 * 0.1).collect();
    let support = SparseVec::from_dense(&[0.0, 1.0, 0.0, 0.0, 2.0, 0.0]);

    let approx =
        correlate::masked_cumulative_approximation(&basis, 0, &acts, tokens, &support).unwrap();
    for t in [0, 2, 3, 5] {
        for j in 0..h {
            assert_eq!(approx[t * h + j], 0.0, "token {t} rank {j}");
        }
    }
    for t in [1, 4] {
        assert!(approx[t * h + h - 1] != 0.0);
    }
}

#[test]
fn zero_interaction_tensor_is_not_an_error() {
    let h = 4;
    let l = vec![0.0_f32; h * h];
    let r = seeded_matrix(h, 0.5);
    let w_u = vec![1.0_f32; h];

    let b = interaction_tensor(&w_u, 1, &l, &r, h).unwrap();
    assert!(b.iter().all(|&v| v == 0.0));

    let (vals, _) = symmetric_eigh(&b, h).unwrap();
    assert!(vals.iter().all(|&v| v == 0.0));
}
