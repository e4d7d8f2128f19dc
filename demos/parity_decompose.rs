//! Train a single-block bilinear net on XOR, then read the learned
//! solution straight out of the weights via eigendecomposition.
//!
//! Run: `cargo run --example parity_decompose`

use bilinear_mlp::{BilinearNet, Config, Dataset, FitConfig, Loss, Shuffle};

fn main() -> bilinear_mlp::Result<()> {
    // +-1 encoding: class is the sign of x0 * x1.
    let inputs = vec![
        1.0, 1.0, //
        -1.0, -1.0, //
        -1.0, 1.0, //
        1.0, -1.0,
    ];
    let train = Dataset::from_labels(inputs, &[0, 0, 1, 1], 2, 2)?;

    let mut net = BilinearNet::new(Config {
        d_input: 2,
        d_hidden: 8,
        d_output: 2,
        n_layer: 1,
        bias: false,
        residual: false,
        seed: 0,
    })?;

    let report = net.fit(
        &train,
        None,
        FitConfig {
            epochs: 400,
            lr: 2e-2,
            batch_size: 4,
            shuffle: Shuffle::Seeded(0),
            weight_decay: 0.0,
            ..FitConfig::default()
        },
    )?;
    let eval = net.evaluate(&train, Loss::SoftmaxCrossEntropy)?;
    println!(
        "trained {} epochs: loss={:.4} accuracy={:.2}",
        report.epochs.len(),
        eval.loss,
        eval.accuracy
    );

    // Each class logit is an exact quadratic form in the input; its
    // spectrum tells us which input directions the model actually uses.
    let dec = net.decompose()?;
    for c in 0..dec.classes() {
        let vals = dec.eigenvalues(c);
        // Ascending order: the extreme ends carry the signal.
        println!(
            "class {c}: lambda_min={:.3} lambda_max={:.3}",
            vals[0],
            vals[dec.hidden() - 1]
        );

        let top = dec.eigenvector(c, dec.hidden() - 1);
        let bottom = dec.eigenvector(c, 0);
        println!("  top direction (input space):    {top:.3?}");
        println!("  bottom direction (input space): {bottom:.3?}");
    }

    Ok(())
}
