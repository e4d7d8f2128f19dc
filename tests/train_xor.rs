//! Training smoke test on XOR, the canonical task a single bilinear block
//! solves through its product nonlinearity, followed by a decomposition of
//! the trained weights.

use bilinear_mlp::{
    interaction_tensor, symmetric_eigh, BilinearNet, Config, Dataset, FitConfig, Loss, LrSchedule,
    Optimizer, Shuffle,
};

fn xor_dataset() -> Dataset {
    // +-1 encoding: class is the sign of x0 * x1.
    let inputs = vec![
        1.0, 1.0, //
        -1.0, -1.0, //
        -1.0, 1.0, //
        1.0, -1.0,
    ];
    Dataset::from_labels(inputs, &[0, 0, 1, 1], 2, 2).unwrap()
}

fn xor_net() -> BilinearNet {
    BilinearNet::new(Config {
        d_input: 2,
        d_hidden: 8,
        d_output: 2,
        n_layer: 1,
        bias: false,
        residual: false,
        seed: 0,
    })
    .unwrap()
}

#[test]
fn single_block_learns_xor() {
    let mut net = xor_net();
    let data = xor_dataset();

    let before = net.evaluate(&data, Loss::SoftmaxCrossEntropy).unwrap();
    let report = net
        .fit(
            &data,
            None,
            FitConfig {
                epochs: 400,
                lr: 2e-2,
                batch_size: 4,
                shuffle: Shuffle::Seeded(0),
                lr_schedule: LrSchedule::CosineAnnealing,
                optimizer: Optimizer::default(),
                weight_decay: 0.0,
                loss: Loss::SoftmaxCrossEntropy,
            },
        )
        .unwrap();

    let after = net.evaluate(&data, Loss::SoftmaxCrossEntropy).unwrap();
    assert!(
        after.loss < 0.5 * before.loss,
        "loss did not drop: {} -> {}",
        before.loss,
        after.loss
    );
    assert!(after.accuracy >= 0.75, "accuracy {}", after.accuracy);
    assert_eq!(report.epochs.len(), 400);
}

#[test]
fn trained_model_logits_equal_the_quadratic_form() {
    // The decomposition is exact, trained or not: for every input, each
    // logit equals Σ_k λ_k (v_k · embed(x))² of its class spectrum.
    let mut net = xor_net();
    let data = xor_dataset();
    net.fit(
        &data,
        None,
        FitConfig {
            epochs: 50,
            lr: 2e-2,
            batch_size: 4,
            weight_decay: 0.0,
            ..FitConfig::default()
        },
    )
    .unwrap();

    let block = net.block(0).unwrap();
    let h = net.hidden_dim();
    let b = interaction_tensor(net.w_u(), net.output_dim(), block.left(), block.right(), h)
        .unwrap();

    let mut scratch = net.scratch();
    for idx in 0..data.len() {
        let x = data.input(idx);
        let logits = net.forward(x, &mut scratch).to_vec();

        // The quadratic form's input is the embed output W_e x.
        let w_e = net.w_e();
        let embed_out: Vec<f32> = (0..h)
            .map(|o| {
                (0..net.input_dim())
                    .map(|i| w_e[o * net.input_dim() + i] * x[i])
                    .sum()
            })
            .collect();

        for c in 0..net.output_dim() {
            let (vals, vecs) = symmetric_eigh(&b[c * h * h..(c + 1) * h * h], h).unwrap();
            let mut quad = 0.0_f32;
            for kk in 0..h {
                let proj: f32 = (0..h).map(|i| vecs[kk * h + i] * embed_out[i]).sum();
                quad += vals[kk] * proj * proj;
            }
            let scale = logits[c].abs().max(1.0);
            assert!(
                (quad - logits[c]).abs() / scale < 1e-3,
                "sample {idx} class {c}: {quad} vs {}",
                logits[c]
            );
        }
    }
}
