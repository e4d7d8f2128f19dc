use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bilinear::{Bilinear, BilinearGradients};
use crate::layer::Linear;
use crate::{Error, Result};

/// Model architecture configuration.
///
/// Defaults suit 28x28 image classification (784 in, 10 classes).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub d_input: usize,
    pub d_hidden: usize,
    pub d_output: usize,
    /// Number of bilinear blocks between embed and head.
    pub n_layer: usize,
    /// Give each bilinear half a bias term.
    pub bias: bool,
    /// Residual connection around each block: `x + block(x)`.
    pub residual: bool,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            d_input: 784,
            d_hidden: 512,
            d_output: 10,
            n_layer: 3,
            bias: false,
            residual: false,
            seed: 42,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.d_input == 0 || self.d_hidden == 0 || self.d_output == 0 {
            return Err(Error::InvalidConfig(
                "d_input, d_hidden and d_output must be > 0".to_owned(),
            ));
        }
        if self.n_layer == 0 {
            return Err(Error::InvalidConfig(
                "n_layer must be > 0 (the bilinear blocks are the only nonlinearity)".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A bilinear feed-forward network: embed -> bilinear blocks -> head.
///
/// The embed and head are bias-free projections; every block computes
/// `(Lx) ⊙ (Rx)` (optionally biased, optionally residual).
#[derive(Debug, Clone)]
pub struct BilinearNet {
    config: Config,
    embed: Linear,
    blocks: Vec<Bilinear>,
    head: Linear,
}

/// Reusable buffers for `BilinearNet::forward`.
///
/// The logits of the most recent forward pass live inside `Scratch`, along
/// with the per-block half pre-products that `backward` needs.
#[derive(Debug, Clone)]
pub struct Scratch {
    pub(crate) embed_out: Vec<f32>,
    pub(crate) block_u: Vec<Vec<f32>>,
    pub(crate) block_v: Vec<Vec<f32>>,
    pub(crate) block_out: Vec<Vec<f32>>,
    pub(crate) logits: Vec<f32>,
}

/// Parameter gradients for a `BilinearNet` (overwrite semantics).
///
/// Allocate once via `BilinearNet::gradients()` and reuse across steps.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub(crate) d_embed: Vec<f32>,
    pub(crate) blocks: Vec<BilinearGradients>,
    pub(crate) d_head: Vec<f32>,

    // Backprop intermediates: gradient w.r.t. each block output, the embed
    // output, and the input. `backward` reads the upstream gradient from
    // `d_logits`; the caller fills it via `d_logits_mut()`.
    d_logits: Vec<f32>,
    d_block_outs: Vec<Vec<f32>>,
    d_embed_out: Vec<f32>,
    d_input: Vec<f32>,
}

/// Reusable buffers for training a specific `BilinearNet`.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub scratch: Scratch,
    pub grads: Gradients,
}

impl BilinearNet {
    /// Build a freshly initialized network from `config` (seeded).
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let embed = Linear::new_with_rng(config.d_input, config.d_hidden, &mut rng);
        let blocks = (0..config.n_layer)
            .map(|_| Bilinear::new_with_rng(config.d_hidden, config.d_hidden, config.bias, &mut rng))
            .collect();
        let head = Linear::new_with_rng(config.d_hidden, config.d_output, &mut rng);

        Ok(Self {
            config,
            embed,
            blocks,
            head,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.config.d_input
    }

    #[inline]
    pub fn hidden_dim(&self) -> usize {
        self.config.d_hidden
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.config.d_output
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Embedding weights, row-major (d_hidden, d_input).
    #[inline]
    pub fn w_e(&self) -> &[f32] {
        self.embed.weights()
    }

    /// Unembedding (head) weights, row-major (d_output, d_hidden).
    #[inline]
    pub fn w_u(&self) -> &[f32] {
        self.head.weights()
    }

    /// Left projection of block `layer`, row-major (d_hidden, d_hidden).
    #[inline]
    pub fn w_l(&self, layer: usize) -> Option<&[f32]> {
        self.blocks.get(layer).map(|b| b.left())
    }

    /// Right projection of block `layer`, row-major (d_hidden, d_hidden).
    #[inline]
    pub fn w_r(&self, layer: usize) -> Option<&[f32]> {
        self.blocks.get(layer).map(|b| b.right())
    }

    #[inline]
    pub fn block(&self, layer: usize) -> Option<&Bilinear> {
        self.blocks.get(layer)
    }

    /// Embed a single input into hidden space.
    ///
    /// This is the stream the decomposition's quadratic forms act on, so
    /// analysis code records it per token.
    pub fn embed(&self, input: &[f32], out: &mut [f32]) {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model d_input {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            out.len(),
            self.hidden_dim(),
            "out len {} does not match model d_hidden {}",
            out.len(),
            self.hidden_dim()
        );
        self.embed.forward(input, out);
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    /// Convenience constructor: allocate all training buffers.
    #[inline]
    pub fn trainer(&self) -> Trainer {
        Trainer::new(self)
    }

    /// Forward pass for a single sample.
    ///
    /// Writes intermediate activations into `scratch` and returns the logits.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_dim()`
    /// - `scratch` must be built for this network
    pub fn forward<'a>(&self, input: &[f32], scratch: &'a mut Scratch) -> &'a [f32] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model d_input {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.block_out.len(),
            self.blocks.len(),
            "scratch has {} block outputs, model has {} blocks",
            scratch.block_out.len(),
            self.blocks.len()
        );

        self.embed.forward(input, &mut scratch.embed_out);

        for (idx, block) in self.blocks.iter().enumerate() {
            if idx == 0 {
                block.forward(
                    &scratch.embed_out,
                    &mut scratch.block_u[0],
                    &mut scratch.block_v[0],
                    &mut scratch.block_out[0],
                );
                if self.config.residual {
                    for (o, &x) in scratch.block_out[0].iter_mut().zip(&scratch.embed_out) {
                        *o += x;
                    }
                }
            } else {
                // Borrow the previous output immutably and the current one mutably.
                let (left, right) = scratch.block_out.split_at_mut(idx);
                let prev = &left[idx - 1];
                let out = &mut right[0];
                block.forward(prev, &mut scratch.block_u[idx], &mut scratch.block_v[idx], out);
                if self.config.residual {
                    for (o, &x) in out.iter_mut().zip(prev.iter()) {
                        *o += x;
                    }
                }
            }
        }

        let last = scratch
            .block_out
            .last()
            .expect("model must have at least one block");
        self.head.forward(last, &mut scratch.logits);
        &scratch.logits
    }

    /// Backward pass for a single sample.
    ///
    /// Call `forward` first with the same `input` and `scratch`, then write
    /// the upstream gradient `dL/d(logits)` into `grads.d_logits_mut()`.
    ///
    /// `grads` is overwritten with gradients for this sample. Returns
    /// dL/d(input).
    pub fn backward<'a>(
        &self,
        input: &[f32],
        scratch: &Scratch,
        grads: &'a mut Gradients,
    ) -> &'a [f32] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model d_input {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            grads.blocks.len(),
            self.blocks.len(),
            "grads has {} block entries, model has {} blocks",
            grads.blocks.len(),
            self.blocks.len()
        );
        assert_eq!(
            grads.d_logits.len(),
            self.output_dim(),
            "grads d_logits len {} does not match model d_output {}",
            grads.d_logits.len(),
            self.output_dim()
        );

        let last_idx = self.blocks.len() - 1;
        {
            let last_hidden = &scratch.block_out[last_idx];
            self.head.backward(
                last_hidden,
                &grads.d_logits,
                &mut grads.d_block_outs[last_idx],
                &mut grads.d_head,
            );
        }

        for idx in (0..self.blocks.len()).rev() {
            let block = &self.blocks[idx];
            let block_input: &[f32] = if idx == 0 {
                &scratch.embed_out
            } else {
                &scratch.block_out[idx - 1]
            };

            if idx == 0 {
                let d_out = &grads.d_block_outs[0];
                block.backward(
                    block_input,
                    &scratch.block_u[0],
                    &scratch.block_v[0],
                    d_out,
                    &mut grads.d_embed_out,
                    &mut grads.blocks[0],
                );
                if self.config.residual {
                    for (d, &g) in grads.d_embed_out.iter_mut().zip(d_out.iter()) {
                        *d += g;
                    }
                }
            } else {
                // Two distinct buffers: `d_out` for this block (read-only),
                // the previous block's slot receives dL/d(block input).
                let (left, right) = grads.d_block_outs.split_at_mut(idx);
                let d_prev = &mut left[idx - 1];
                let d_out = &right[0];
                block.backward(
                    block_input,
                    &scratch.block_u[idx],
                    &scratch.block_v[idx],
                    d_out,
                    d_prev,
                    &mut grads.blocks[idx],
                );
                if self.config.residual {
                    for (d, &g) in d_prev.iter_mut().zip(d_out.iter()) {
                        *d += g;
                    }
                }
            }
        }

        self.embed.backward(
            input,
            &grads.d_embed_out,
            &mut grads.d_input,
            &mut grads.d_embed,
        );
        &grads.d_input
    }

    /// Applies `param -= lr * d_param` to every parameter group.
    #[inline]
    pub fn sgd_step(&mut self, grads: &Gradients, lr: f32) {
        assert!(
            lr.is_finite() && lr > 0.0,
            "learning rate must be finite and > 0"
        );
        let updates = grads.param_groups();
        let mut params = self.param_groups_mut();
        assert_eq!(params.len(), updates.len());
        for (p, g) in params.iter_mut().zip(updates) {
            debug_assert_eq!(p.len(), g.len());
            for (pv, &gv) in p.iter_mut().zip(g) {
                *pv -= lr * gv;
            }
        }
    }

    /// Multiplies every parameter by `factor` (decoupled weight decay).
    #[inline]
    pub(crate) fn scale_params(&mut self, factor: f32) {
        for group in self.param_groups_mut() {
            for p in group.iter_mut() {
                *p *= factor;
            }
        }
    }

    /// All trainable parameter groups in canonical order:
    /// embed, then per block left/right (+ biases), then head.
    pub(crate) fn param_groups_mut(&mut self) -> Vec<&mut [f32]> {
        let mut groups: Vec<&mut [f32]> = Vec::with_capacity(2 + 4 * self.blocks.len());
        groups.push(self.embed.weights_mut());
        for block in &mut self.blocks {
            let (left, right, left_bias, right_bias) = block.params_mut();
            groups.push(left);
            groups.push(right);
            if let Some(bl) = left_bias {
                groups.push(bl);
            }
            if let Some(br) = right_bias {
                groups.push(br);
            }
        }
        groups.push(self.head.weights_mut());
        groups
    }
}

impl Scratch {
    pub fn new(net: &BilinearNet) -> Self {
        let h = net.hidden_dim();
        let n = net.num_blocks();
        Self {
            embed_out: vec![0.0; h],
            block_u: vec![vec![0.0; h]; n],
            block_v: vec![vec![0.0; h]; n],
            block_out: vec![vec![0.0; h]; n],
            logits: vec![0.0; net.output_dim()],
        }
    }

    /// The logits of the most recent forward pass.
    #[inline]
    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    /// The hidden activation feeding the head (input to the unembedding).
    #[inline]
    pub fn last_hidden(&self) -> &[f32] {
        self.block_out
            .last()
            .expect("model must have at least one block")
    }
}

impl Gradients {
    pub fn new(net: &BilinearNet) -> Self {
        let h = net.hidden_dim();
        Self {
            d_embed: vec![0.0; net.input_dim() * h],
            blocks: net.blocks.iter().map(BilinearGradients::new).collect(),
            d_head: vec![0.0; h * net.output_dim()],
            d_logits: vec![0.0; net.output_dim()],
            d_block_outs: vec![vec![0.0; h]; net.num_blocks()],
            d_embed_out: vec![0.0; h],
            d_input: vec![0.0; net.input_dim()],
        }
    }

    /// Mutable view of the upstream gradient buffer for the logits.
    ///
    /// Typical training flow:
    /// - `net.forward(input, &mut scratch)`
    /// - loss writes `dL/d(logits)` into `grads.d_logits_mut()`
    /// - `net.backward(input, &scratch, &mut grads)`
    #[inline]
    pub fn d_logits_mut(&mut self) -> &mut [f32] {
        &mut self.d_logits
    }

    #[inline]
    pub fn d_input(&self) -> &[f32] {
        &self.d_input
    }

    /// Gradient groups in the same canonical order as
    /// `BilinearNet::param_groups_mut`.
    pub(crate) fn param_groups(&self) -> Vec<&[f32]> {
        let mut groups: Vec<&[f32]> = Vec::with_capacity(2 + 4 * self.blocks.len());
        groups.push(&self.d_embed);
        for b in &self.blocks {
            groups.push(&b.d_left);
            groups.push(&b.d_right);
            if let Some(dbl) = &b.d_left_bias {
                groups.push(dbl);
            }
            if let Some(dbr) = &b.d_right_bias {
                groups.push(dbr);
            }
        }
        groups.push(&self.d_head);
        groups
    }

    /// Mutable gradient groups, canonical order.
    pub(crate) fn param_groups_mut(&mut self) -> Vec<&mut [f32]> {
        let mut groups: Vec<&mut [f32]> = Vec::with_capacity(2 + 4 * self.blocks.len());
        groups.push(&mut self.d_embed);
        for b in &mut self.blocks {
            groups.push(&mut b.d_left);
            groups.push(&mut b.d_right);
            if let Some(dbl) = &mut b.d_left_bias {
                groups.push(dbl);
            }
            if let Some(dbr) = &mut b.d_right_bias {
                groups.push(dbr);
            }
        }
        groups.push(&mut self.d_head);
        groups
    }
}

impl Trainer {
    pub fn new(net: &BilinearNet) -> Self {
        Self {
            scratch: Scratch::new(net),
            grads: Gradients::new(net),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss;

    fn tiny_config() -> Config {
        Config {
            d_input: 3,
            d_hidden: 4,
            d_output: 2,
            n_layer: 2,
            bias: false,
            residual: false,
            seed: 0,
        }
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let a = BilinearNet::new(tiny_config()).unwrap();
        let b = BilinearNet::new(tiny_config()).unwrap();

        let mut scratch_a = a.scratch();
        let mut scratch_b = b.scratch();
        let input = [0.3_f32, -0.7, 0.1];

        let out_a = a.forward(&input, &mut scratch_a).to_vec();
        let out_b = b.forward(&input, &mut scratch_b).to_vec();
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn config_rejects_zero_blocks() {
        let cfg = Config {
            n_layer: 0,
            ..tiny_config()
        };
        assert!(BilinearNet::new(cfg).is_err());
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        for residual in [false, true] {
            let cfg = Config {
                residual,
                bias: true,
                ..tiny_config()
            };
            let net = BilinearNet::new(cfg).unwrap();
            let mut scratch = net.scratch();
            let mut grads = net.gradients();

            let input = [0.3_f32, -0.7, 0.1];
            let target = [1.0_f32, 0.0];

            net.forward(&input, &mut scratch);
            loss::softmax_cross_entropy_backward(
                scratch.logits(),
                &target,
                grads.d_logits_mut(),
            );
            let d_input = net.backward(&input, &scratch, &mut grads).to_vec();

            let loss_at = |net: &BilinearNet, input: &[f32]| -> f32 {
                let mut s = net.scratch();
                net.forward(input, &mut s);
                loss::softmax_cross_entropy(s.logits(), &target)
            };

            let eps = 1e-2_f32;
            let assert_close = |analytic: f32, numeric: f32| {
                let diff = (analytic - numeric).abs();
                let scale = analytic.abs().max(numeric.abs()).max(1.0);
                assert!(
                    diff <= 2e-2 || diff / scale <= 2e-2,
                    "analytic={analytic} numeric={numeric} (residual={residual})"
                );
            };

            // Probe every parameter group with central differences.
            let analytic: Vec<Vec<f32>> = grads
                .param_groups()
                .into_iter()
                .map(|g| g.to_vec())
                .collect();
            for (group_idx, group) in analytic.iter().enumerate() {
                for p in 0..group.len() {
                    let mut probe = net.clone();
                    probe.param_groups_mut()[group_idx][p] += eps;
                    let plus = loss_at(&probe, &input);
                    probe.param_groups_mut()[group_idx][p] -= 2.0 * eps;
                    let minus = loss_at(&probe, &input);
                    assert_close(group[p], (plus - minus) / (2.0 * eps));
                }
            }

            // And the input gradient.
            let mut probe = input;
            for i in 0..probe.len() {
                let orig = probe[i];
                probe[i] = orig + eps;
                let plus = loss_at(&net, &probe);
                probe[i] = orig - eps;
                let minus = loss_at(&net, &probe);
                probe[i] = orig;
                assert_close(d_input[i], (plus - minus) / (2.0 * eps));
            }
        }
    }

    #[test]
    fn residual_adds_identity_path() {
        let cfg = Config {
            residual: true,
            n_layer: 1,
            ..tiny_config()
        };
        let plain_cfg = Config {
            residual: false,
            n_layer: 1,
            ..tiny_config()
        };
        let res = BilinearNet::new(cfg).unwrap();
        let plain = BilinearNet::new(plain_cfg).unwrap();

        let input = [0.5_f32, 0.25, -0.5];
        let mut s_res = res.scratch();
        let mut s_plain = plain.scratch();
        res.forward(&input, &mut s_res);
        plain.forward(&input, &mut s_plain);

        // Same seed, so the block outputs differ exactly by the embed output.
        for (r, (p, e)) in s_res.block_out[0]
            .iter()
            .zip(s_plain.block_out[0].iter().zip(&s_plain.embed_out))
        {
            assert!((r - (p + e)).abs() < 1e-6);
        }
    }

    #[test]
    #[should_panic]
    fn forward_panics_on_input_shape_mismatch() {
        let net = BilinearNet::new(tiny_config()).unwrap();
        let mut scratch = net.scratch();
        let input = [0.0_f32; 5];
        net.forward(&input, &mut scratch);
    }
}
