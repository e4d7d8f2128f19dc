//! Loss functions.
//!
//! Small, allocation-free helpers used like:
//!
//! - run `net.forward(...)`
//! - compute `d_logits` via a loss (e.g. `softmax_cross_entropy_backward`)
//! - run `net.backward(...)`
//! - update parameters with an optimizer
//!
//! The classifier trains with softmax cross-entropy; the sparse autoencoder
//! reconstructs with MSE.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Supported loss functions.
pub enum Loss {
    /// Softmax cross-entropy. Expects raw logits and a one-hot target.
    #[default]
    SoftmaxCrossEntropy,
    /// Mean squared error.
    Mse,
}

impl Loss {
    /// Compute a loss value.
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f32], target: &[f32]) -> f32 {
        match self {
            Loss::SoftmaxCrossEntropy => softmax_cross_entropy(pred, target),
            Loss::Mse => mse(pred, target),
        }
    }

    /// Compute loss + gradient w.r.t `pred`.
    ///
    /// Writes `d_pred = dL/d(pred)` into `d_pred` and returns the loss.
    #[inline]
    pub fn backward(self, pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
        match self {
            Loss::SoftmaxCrossEntropy => softmax_cross_entropy_backward(pred, target, d_pred),
            Loss::Mse => mse_backward(pred, target, d_pred),
        }
    }
}

/// Mean squared error: `0.5 * mean((pred - target)^2)`.
#[inline]
pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    0.5 * sum_sq * inv_n
}

/// MSE loss + gradient w.r.t. `pred`: `d_pred[i] = (pred[i] - target[i]) / N`.
#[inline]
pub fn mse_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;

    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
        d_pred[i] = diff * inv_n;
    }

    0.5 * sum_sq * inv_n
}

/// Softmax cross-entropy over a single sample.
///
/// `logits` is a length-K vector, `target` a one-hot length-K vector.
/// Uses a stable log-sum-exp.
#[inline]
pub fn softmax_cross_entropy(logits: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        logits.len(),
        target.len(),
        "pred len {} does not match target len {}",
        logits.len(),
        target.len()
    );
    assert!(
        !logits.is_empty(),
        "softmax_cross_entropy requires at least 1 class"
    );

    let (log_sum_exp, _max) = log_sum_exp_and_max(logits);

    // Cross entropy: -Σ_i t_i * log softmax_i, with
    // log softmax_i = logits[i] - log_sum_exp.
    let mut sum = 0.0_f32;
    for i in 0..logits.len() {
        let t = target[i];
        if t != 0.0 {
            sum -= t * (logits[i] - log_sum_exp);
        }
    }
    sum
}

/// Softmax cross-entropy + gradient w.r.t. logits.
///
/// Writes `d_logits = softmax(logits) - target`. Allocation-free: the
/// softmax is computed into `d_logits` and turned into a gradient in place.
#[inline]
pub fn softmax_cross_entropy_backward(logits: &[f32], target: &[f32], d_logits: &mut [f32]) -> f32 {
    assert_eq!(
        logits.len(),
        target.len(),
        "pred len {} does not match target len {}",
        logits.len(),
        target.len()
    );
    assert_eq!(
        logits.len(),
        d_logits.len(),
        "pred len {} does not match d_pred len {}",
        logits.len(),
        d_logits.len()
    );
    assert!(
        !logits.is_empty(),
        "softmax_cross_entropy_backward requires at least 1 class"
    );

    let k = logits.len();
    let (log_sum_exp, max_logit) = log_sum_exp_and_max(logits);

    // Softmax into d_logits.
    for i in 0..k {
        d_logits[i] = (logits[i] - max_logit).exp();
    }
    let mut sum_exp = 0.0_f32;
    for &v in d_logits.iter() {
        sum_exp += v;
    }
    let inv_sum = 1.0 / sum_exp;
    for v in d_logits.iter_mut() {
        *v *= inv_sum;
    }

    // Loss.
    let mut loss = 0.0_f32;
    for i in 0..k {
        let t = target[i];
        if t != 0.0 {
            loss -= t * (logits[i] - log_sum_exp);
        }
    }

    // Gradient: softmax - target.
    for i in 0..k {
        d_logits[i] -= target[i];
    }

    loss
}

#[inline]
fn log_sum_exp_and_max(xs: &[f32]) -> (f32, f32) {
    let mut max_x = xs[0];
    for &x in xs.iter().skip(1) {
        if x > max_x {
            max_x = x;
        }
    }
    let mut sum_exp = 0.0_f32;
    for &x in xs {
        sum_exp += (x - max_x).exp();
    }
    (max_x + sum_exp.ln(), max_x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_is_zero_when_equal() {
        let pred = [1.0_f32, -2.0, 0.5];
        let target = pred;
        assert_eq!(mse(&pred, &target), 0.0);
    }

    #[test]
    fn mse_backward_matches_expected_gradient() {
        let pred = [1.0_f32, 3.0];
        let target = [2.0_f32, 1.0];
        let mut d_pred = [0.0_f32; 2];
        let loss = mse_backward(&pred, &target, &mut d_pred);

        // L = 0.5 * mean([(-1)^2, (2)^2]) = 1.25
        assert!((loss - 1.25).abs() < 1e-6);
        assert!((d_pred[0] - (-0.5)).abs() < 1e-6);
        assert!((d_pred[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn softmax_cross_entropy_prefers_correct_class() {
        let logits_good = [5.0_f32, 0.0, -1.0];
        let logits_bad = [-1.0_f32, 0.0, 5.0];
        let target = [1.0_f32, 0.0, 0.0];
        assert!(softmax_cross_entropy(&logits_good, &target) < softmax_cross_entropy(&logits_bad, &target));
    }

    #[test]
    fn softmax_backward_gradient_sums_to_zero_for_one_hot_target() {
        let logits = [0.2_f32, -1.0, 3.0];
        let target = [0.0_f32, 1.0, 0.0];
        let mut d = [0.0_f32; 3];
        softmax_cross_entropy_backward(&logits, &target, &mut d);
        // softmax sums to 1 and the one-hot target sums to 1.
        let sum: f32 = d.iter().sum();
        assert!(sum.abs() < 1e-6);
    }

    #[test]
    fn softmax_is_stable_for_extreme_logits() {
        let logits = [1000.0_f32, 0.0];
        let target = [1.0_f32, 0.0];
        let loss = softmax_cross_entropy(&logits, &target);
        assert!(loss.is_finite());
        assert!(loss < 1e-3);
    }
}
