//! Sparse approximation/correlation evaluator.
//!
//! Given a truncated eigenbasis and ground-truth sparse feature
//! activations, this module scores how well the low-rank quadratic form
//! `Σ_{j≤rank} λ_j (v_j · x)²` predicts the real activations, per feature
//! and per truncation rank.
//!
//! Two disciplines keep this correct and bounded:
//! - evaluation is restricted to the ground-truth support: approximation
//!   values are gathered at exactly the coordinates where the feature
//!   fired, never thresholded independently, so the paired series always
//!   have equal length;
//! - features with too few firings (`nnz <= min_nnz`) or a constant series
//!   are excluded from the aggregate, not errors, and the exclusion counts
//!   are reported for audit.

use std::path::Path;

use crate::decompose::TruncatedEigenbasis;
use crate::{Error, Result};

/// A sparse vector: non-zero entries and their coordinates only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVec {
    entries: Vec<(usize, f32)>,
}

impl SparseVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gather the non-zero entries of a dense vector.
    pub fn from_dense(dense: &[f32]) -> Self {
        let entries = dense
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0.0)
            .map(|(i, &v)| (i, v))
            .collect();
        Self { entries }
    }

    /// Append an entry; coordinates must arrive in increasing order.
    #[inline]
    pub fn push(&mut self, index: usize, value: f32) {
        debug_assert!(
            self.entries.last().map(|&(i, _)| i < index).unwrap_or(true),
            "sparse coordinates must be strictly increasing"
        );
        self.entries.push((index, value));
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, (usize, f32)> {
        self.entries.iter()
    }

    /// The non-zero values, in coordinate order.
    pub fn values(&self) -> Vec<f32> {
        self.entries.iter().map(|&(_, v)| v).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelateConfig {
    /// Features with `nnz <= min_nnz` are excluded as statistically
    /// unreliable.
    pub min_nnz: usize,
    /// Which truncation rank (0-based) feeds the per-feature records.
    pub report_rank: usize,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            min_nnz: 10,
            report_rank: 0,
        }
    }
}

/// Per-feature correlation at the configured report rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationRecord {
    pub feature_index: usize,
    pub correlation: f32,
    pub nonzero_count: usize,
}

/// Output of [`evaluate`].
#[derive(Debug, Clone)]
pub struct CorrelationReport {
    /// One record per qualifying feature, at `report_rank`.
    pub records: Vec<CorrelationRecord>,
    /// Mean correlation across qualifying features, per truncation rank.
    /// `NaN` for a rank where no feature qualified.
    pub mean_by_rank: Vec<f32>,
    /// Features dropped for `nnz <= min_nnz` (including never-firing ones).
    pub excluded_low_nnz: usize,
    /// Features dropped at `report_rank` for a constant/unusable series.
    pub excluded_degenerate: usize,
}

/// Score a truncated eigenbasis against ground-truth feature activations.
///
/// `acts` is the shared hidden stream, row-major `(tokens, hidden)`;
/// `truth` holds one sparse ground-truth row per feature. For each feature
/// the approximation is computed only at the ground-truth support, as a
/// cumulative sum over ranks, so a single pass yields the whole
/// rank-vs-fidelity curve.
pub fn evaluate(
    basis: &TruncatedEigenbasis,
    acts: &[f32],
    tokens: usize,
    truth: &[SparseVec],
    cfg: CorrelateConfig,
) -> Result<CorrelationReport> {
    let h = basis.hidden();
    let k = basis.k();
    if acts.len() != tokens * h {
        return Err(Error::InvalidShape(format!(
            "acts length {} does not match tokens * hidden ({tokens} * {h})",
            acts.len()
        )));
    }
    if truth.len() != basis.features() {
        return Err(Error::InvalidShape(format!(
            "truth has {} features, basis has {}",
            truth.len(),
            basis.features()
        )));
    }
    if cfg.report_rank >= k {
        return Err(Error::InvalidConfig(format!(
            "report_rank {} must be < k {k}",
            cfg.report_rank
        )));
    }
    for (f, sv) in truth.iter().enumerate() {
        if let Some(&(t, _)) = sv.iter().last() {
            if t >= tokens {
                return Err(Error::InvalidData(format!(
                    "feature {f} has coordinate {t} outside 0..{tokens}"
                )));
            }
        }
    }

    let mut mean_acc = vec![0.0_f64; k];
    let mut mean_cnt = vec![0_usize; k];
    let mut records = Vec::new();
    let mut excluded_low_nnz = 0_usize;
    let mut excluded_degenerate = 0_usize;

    // Reused per feature: cumulative approximations at the support, and one
    // rank's slice of them.
    let mut approx: Vec<f32> = Vec::new();
    let mut rank_series: Vec<f32> = Vec::new();
    let mut truth_series: Vec<f32> = Vec::new();

    for f in 0..basis.features() {
        let sv = &truth[f];
        if sv.nnz() <= cfg.min_nnz {
            excluded_low_nnz += 1;
            continue;
        }

        // approx[pos * k + j] = Σ_{j'≤j} λ_j' (v_j' · x_pos)², evaluated
        // only at the ground-truth support.
        approx.clear();
        let vals = basis.eigenvalues(f);
        for &(t, _) in sv.iter() {
            let x = &acts[t * h..(t + 1) * h];
            let mut cum = 0.0_f32;
            for j in 0..k {
                let p = crate::linalg::dot(basis.eigenvector(f, j), x);
                cum = vals[j].mul_add(p * p, cum);
                approx.push(cum);
            }
        }

        truth_series.clear();
        truth_series.extend(sv.iter().map(|&(_, v)| v));

        for j in 0..k {
            rank_series.clear();
            rank_series.extend((0..sv.nnz()).map(|pos| approx[pos * k + j]));

            match pearson(&truth_series, &rank_series) {
                Some(corr) => {
                    mean_acc[j] += corr as f64;
                    mean_cnt[j] += 1;
                    if j == cfg.report_rank {
                        records.push(CorrelationRecord {
                            feature_index: f,
                            correlation: corr,
                            nonzero_count: sv.nnz(),
                        });
                    }
                }
                None => {
                    if j == cfg.report_rank {
                        excluded_degenerate += 1;
                    }
                }
            }
        }
    }

    let mean_by_rank = mean_acc
        .iter()
        .zip(&mean_cnt)
        .map(|(&acc, &cnt)| if cnt > 0 { (acc / cnt as f64) as f32 } else { f32::NAN })
        .collect();

    Ok(CorrelationReport {
        records,
        mean_by_rank,
        excluded_low_nnz,
        excluded_degenerate,
    })
}

/// Pearson correlation coefficient of two paired series.
///
/// Returns `None` instead of erroring for unusable input: mismatched
/// lengths (diverged supports are skipped, not fatal), fewer than two
/// points, or a constant series (zero variance). Accumulates in `f64` and
/// clamps the result into `[-1, 1]`.
pub fn pearson(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let ma = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mb = b.iter().map(|&x| x as f64).sum::<f64>() / n;

    let mut cov = 0.0_f64;
    let mut var_a = 0.0_f64;
    let mut var_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x as f64 - ma;
        let dy = y as f64 - mb;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 1e-24 || var_b <= 1e-24 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

/// Dense cumulative approximation for one feature, masked to the
/// ground-truth support.
///
/// Returns row-major `(tokens, k)`, zero at every token where the feature
/// did not fire. [`evaluate`] never materializes this; it exists for
/// inspection and for checking the masking invariant directly.
pub fn masked_cumulative_approximation(
    basis: &TruncatedEigenbasis,
    feature: usize,
    acts: &[f32],
    tokens: usize,
    support: &SparseVec,
) -> Result<Vec<f32>> {
    let h = basis.hidden();
    let k = basis.k();
    if acts.len() != tokens * h {
        return Err(Error::InvalidShape(format!(
            "acts length {} does not match tokens * hidden ({tokens} * {h})",
            acts.len()
        )));
    }
    if feature >= basis.features() {
        return Err(Error::InvalidShape(format!(
            "feature {feature} out of range for basis with {} features",
            basis.features()
        )));
    }

    let vals = basis.eigenvalues(feature);
    let mut out = vec![0.0_f32; tokens * k];
    for &(t, _) in support.iter() {
        if t >= tokens {
            return Err(Error::InvalidData(format!(
                "support coordinate {t} outside 0..{tokens}"
            )));
        }
        let x = &acts[t * h..(t + 1) * h];
        let mut cum = 0.0_f32;
        for j in 0..k {
            let p = crate::linalg::dot(basis.eigenvector(feature, j), x);
            cum = vals[j].mul_add(p * p, cum);
            out[t * k + j] = cum;
        }
    }
    Ok(out)
}

impl CorrelationReport {
    /// Write the per-feature records as a delimited file with columns
    /// `feature_index,correlation,nonzero_count`.
    pub fn records_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut s = String::from("feature_index,correlation,nonzero_count\n");
        for r in &self.records {
            s.push_str(&format!(
                "{},{},{}\n",
                r.feature_index, r.correlation, r.nonzero_count
            ));
        }
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))
    }

    /// Write the rank curve as a delimited file with columns
    /// `rank,mean_correlation`.
    pub fn mean_by_rank_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut s = String::from("rank,mean_correlation\n");
        for (rank, corr) in self.mean_by_rank.iter().enumerate() {
            s.push_str(&format!("{rank},{corr}\n"));
        }
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::decompose_directions;

    #[test]
    fn pearson_of_perfectly_anticorrelated_pair_is_minus_one() {
        // Ground truth [0,0,5,0,3] against pre-mask approximation
        // [2,2,4,2,9]: the support is {2,4}, so the paired series are
        // [5,3] and [4,9].
        let truth = SparseVec::from_dense(&[0.0, 0.0, 5.0, 0.0, 3.0]);
        assert_eq!(truth.nnz(), 2);
        let gathered = [4.0_f32, 9.0];
        let corr = pearson(&truth.values(), &gathered).unwrap();
        assert!((corr - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn pearson_skips_unusable_series() {
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn pearson_stays_in_bounds() {
        let a = [1.0_f32, 2.0, 3.0, 4.0];
        let b = [2.0_f32, 4.0, 6.0, 8.0];
        let corr = pearson(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&corr));
        assert!((corr - 1.0).abs() < 1e-6);
    }

    /// A 1-hidden-dim basis whose approximation is exactly λ x².
    fn scalar_basis(lambdas: &[f32]) -> TruncatedEigenbasis {
        let features = lambdas.len();
        let l = [1.0_f32];
        let r = [1.0_f32];
        decompose_directions(lambdas, features, &l, &r, 1, 1).unwrap()
    }

    #[test]
    fn evaluate_matches_hand_computed_example() {
        // One feature, λ = 1, tokens x = [0, 0, 2, 0, 3]: approximation at
        // the support {2, 4} is [4, 9] against ground truth [5, 3].
        let basis = scalar_basis(&[1.0]);
        let acts = [0.0_f32, 0.0, 2.0, 0.0, 3.0];
        let truth = vec![SparseVec::from_dense(&[0.0, 0.0, 5.0, 0.0, 3.0])];

        let report = evaluate(
            &basis,
            &acts,
            5,
            &truth,
            CorrelateConfig {
                min_nnz: 1,
                report_rank: 0,
            },
        )
        .unwrap();

        assert_eq!(report.records.len(), 1);
        let rec = report.records[0];
        assert_eq!(rec.feature_index, 0);
        assert_eq!(rec.nonzero_count, 2);
        assert!((rec.correlation - (-1.0)).abs() < 1e-6);
        assert!((report.mean_by_rank[0] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn evaluate_excludes_low_nnz_features() {
        let basis = scalar_basis(&[1.0, 1.0]);
        let acts = [1.0_f32, 2.0, 3.0, 4.0];
        // Feature 0 fires 3 times, feature 1 only once.
        let truth = vec![
            SparseVec::from_dense(&[1.0, 4.0, 9.0, 0.0]),
            SparseVec::from_dense(&[0.0, 0.0, 0.0, 1.0]),
        ];

        let report = evaluate(
            &basis,
            &acts,
            4,
            &truth,
            CorrelateConfig {
                min_nnz: 2,
                report_rank: 0,
            },
        )
        .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].feature_index, 0);
        assert_eq!(report.excluded_low_nnz, 1);
    }

    #[test]
    fn evaluate_counts_degenerate_features_without_crashing() {
        // λ = 0 makes the approximation identically zero (constant).
        let basis = scalar_basis(&[0.0]);
        let acts = [1.0_f32, 2.0, 3.0];
        let truth = vec![SparseVec::from_dense(&[1.0, 2.0, 3.0])];

        let report = evaluate(
            &basis,
            &acts,
            3,
            &truth,
            CorrelateConfig {
                min_nnz: 1,
                report_rank: 0,
            },
        )
        .unwrap();

        assert!(report.records.is_empty());
        assert_eq!(report.excluded_degenerate, 1);
        assert!(report.mean_by_rank[0].is_nan());
    }

    #[test]
    fn masked_approximation_is_zero_off_support() {
        let basis = scalar_basis(&[2.0]);
        let acts = [1.0_f32, 2.0, 3.0, 4.0];
        let support = SparseVec::from_dense(&[0.0, 1.0, 0.0, 1.0]);

        let approx = masked_cumulative_approximation(&basis, 0, &acts, 4, &support).unwrap();
        assert_eq!(approx.len(), 4);
        assert_eq!(approx[0], 0.0);
        assert_eq!(approx[2], 0.0);
        assert!((approx[1] - 2.0 * 4.0).abs() < 1e-6);
        assert!((approx[3] - 2.0 * 16.0).abs() < 1e-6);
    }

    #[test]
    fn evaluate_rejects_shape_mismatches() {
        let basis = scalar_basis(&[1.0]);
        let truth = vec![SparseVec::new()];
        assert!(evaluate(&basis, &[0.0; 3], 4, &truth, CorrelateConfig::default()).is_err());
        assert!(evaluate(&basis, &[0.0; 4], 4, &[], CorrelateConfig::default()).is_err());
        let bad_rank = CorrelateConfig {
            min_nnz: 10,
            report_rank: 5,
        };
        assert!(evaluate(&basis, &[0.0; 4], 4, &truth, bad_rank).is_err());
    }

    #[test]
    fn csv_export_writes_expected_columns() {
        let report = CorrelationReport {
            records: vec![CorrelationRecord {
                feature_index: 7,
                correlation: 0.5,
                nonzero_count: 12,
            }],
            mean_by_rank: vec![0.25, 0.5],
            excluded_low_nnz: 0,
            excluded_degenerate: 0,
        };

        let dir = std::env::temp_dir();
        let records_path = dir.join(format!("bilinear-mlp-records-{}.csv", std::process::id()));
        let curve_path = dir.join(format!("bilinear-mlp-curve-{}.csv", std::process::id()));

        report.records_to_csv(&records_path).unwrap();
        report.mean_by_rank_to_csv(&curve_path).unwrap();

        let records = std::fs::read_to_string(&records_path).unwrap();
        assert_eq!(records, "feature_index,correlation,nonzero_count\n7,0.5,12\n");
        let curve = std::fs::read_to_string(&curve_path).unwrap();
        assert_eq!(curve, "rank,mean_correlation\n0,0.25\n1,0.5\n");

        std::fs::remove_file(records_path).unwrap();
        std::fs::remove_file(curve_path).unwrap();
    }
}
