//! Full analysis pipeline on synthetic data: train a bilinear classifier,
//! fit a top-k sparse autoencoder on its block outputs, decompose every
//! feature's decoder direction into a truncated eigenbasis, and score how
//! well the low-rank quadratic forms predict the real feature activations.
//!
//! Run: `cargo run --example feature_correlations`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bilinear_mlp::correlate::{self, CorrelateConfig};
use bilinear_mlp::sae::{SaeConfig, SaeFitConfig, TopKSae};
use bilinear_mlp::{
    decompose_directions, BilinearNet, Config, Dataset, FitConfig, Inputs, Loss, Shuffle,
};

fn main() -> bilinear_mlp::Result<()> {
    let mut rng = StdRng::seed_from_u64(0);

    // Synthetic 2-class task in 4d, separable through pairwise products.
    let n = 512;
    let d_input = 4;
    let mut inputs = Vec::with_capacity(n * d_input);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let x: Vec<f32> = (0..d_input).map(|_| rng.gen_range(-1.0..1.0)).collect();
        labels.push(usize::from(x[0] * x[1] + x[2] * x[3] > 0.0));
        inputs.extend_from_slice(&x);
    }
    let train = Dataset::from_labels(inputs, &labels, d_input, 2)?;

    let mut net = BilinearNet::new(Config {
        d_input,
        d_hidden: 16,
        d_output: 2,
        n_layer: 1,
        bias: false,
        residual: false,
        seed: 0,
    })?;
    net.fit(
        &train,
        None,
        FitConfig {
            epochs: 60,
            lr: 1e-2,
            batch_size: 64,
            shuffle: Shuffle::Seeded(0),
            weight_decay: 0.0,
            ..FitConfig::default()
        },
    )?;
    let eval = net.evaluate(&train, Loss::SoftmaxCrossEntropy)?;
    println!("classifier: loss={:.4} accuracy={:.2}", eval.loss, eval.accuracy);

    // Record the embed stream (the quadratic forms' input) and the block
    // outputs (what the SAE reconstructs).
    let h = net.hidden_dim();
    let block = net.block(0).expect("single-block model");
    let mut embed_stream = vec![0.0_f32; n * h];
    let mut block_stream = vec![0.0_f32; n * h];
    let (mut u, mut v) = (vec![0.0_f32; h], vec![0.0_f32; h]);
    for t in 0..n {
        let (embed_row, block_row) = (
            &mut embed_stream[t * h..(t + 1) * h],
            &mut block_stream[t * h..(t + 1) * h],
        );
        net.embed(train.input(t), embed_row);
        block.forward(embed_row, &mut u, &mut v, block_row);
    }
    let block_acts = Inputs::from_flat(block_stream, h)?;

    // A small top-k SAE over the block outputs supplies the ground truth.
    let mut sae = TopKSae::new(SaeConfig {
        d_model: h,
        expansion: 2,
        k: 4,
        seed: 0,
    })?;
    let losses = sae.fit(
        &block_acts,
        SaeFitConfig {
            epochs: 30,
            lr: 1e-3,
            batch_size: 64,
            shuffle_seed: 0,
        },
    )?;
    println!(
        "sae: reconstruction loss {:.5} -> {:.5}",
        losses.first().unwrap(),
        losses.last().unwrap()
    );

    // One truncated spectrum per feature, taken through the same bilinear
    // block the features read from.
    let top_k = 8;
    let basis = decompose_directions(
        &sae.decoder_directions(),
        sae.d_features(),
        block.left(),
        block.right(),
        h,
        top_k,
    )?;

    let truth = sae.feature_activations(&block_acts)?;
    let report = correlate::evaluate(
        &basis,
        &embed_stream,
        n,
        &truth,
        CorrelateConfig {
            min_nnz: 10,
            report_rank: 1,
        },
    )?;

    println!(
        "features: {} reported, {} excluded (low nnz), {} excluded (degenerate)",
        report.records.len(),
        report.excluded_low_nnz,
        report.excluded_degenerate
    );
    for (rank, corr) in report.mean_by_rank.iter().enumerate() {
        println!("  rank {rank:2}: mean correlation {corr:+.4}");
    }

    let dir = std::env::temp_dir();
    let records_path = dir.join("feature-metrics.csv");
    let curve_path = dir.join("feature-corr-by-rank.csv");
    report.records_to_csv(&records_path)?;
    report.mean_by_rank_to_csv(&curve_path)?;
    println!(
        "wrote {} and {}",
        records_path.display(),
        curve_path.display()
    );

    Ok(())
}
