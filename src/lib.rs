//! A small bilinear MLP and its interpretability toolkit.
//!
//! `bilinear-mlp` is a small-core, from-scratch implementation of a
//! feed-forward network whose blocks compute `(Lx) ⊙ (Rx)` instead of an
//! elementwise nonlinearity, plus the closed-form analysis that product
//! structure buys: each output of a single-block model is an exact
//! quadratic form in the input, so the learned weights can be
//! eigendecomposed and the top eigen-directions scored against real
//! downstream feature activations.
//!
//! # What's here
//!
//! - Model and training: [`BilinearNet`], [`Config`], `fit`/`evaluate`
//!   with mini-batches, shuffling, cosine LR, and AdamW.
//! - Decomposition: [`interaction_tensor`], [`decompose`] (per class,
//!   projected to input space), [`decompose_directions`] +
//!   [`truncate_by_magnitude`] (per feature, truncated by |eigenvalue|),
//!   with a keyed on-disk cache behind the `serde` feature.
//! - Evaluation: a top-k sparse autoencoder ([`TopKSae`]) supplying
//!   ground-truth feature activations, and the sparse correlation
//!   evaluator ([`correlate::evaluate`]) producing per-feature records and
//!   a rank-vs-fidelity curve, exportable as delimited files.
//!
//! # Panics vs `Result`
//!
//! This crate intentionally exposes two layers of API:
//!
//! - Low-level hot path (panics on misuse):
//!   [`BilinearNet::forward`], [`BilinearNet::backward`] and the layer
//!   forward/backward passes treat shape mismatches as programmer error
//!   and `assert!`.
//! - High-level convenience APIs (shape-checked): `fit`, `evaluate`,
//!   `predict`, the decomposition entry points, and
//!   [`correlate::evaluate`] validate inputs and return [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`; spectral and statistical inner loops accumulate in
//!   `f64` internally.
//! - All matrices are contiguous row-major buffers. Layer weights have
//!   shape `(out_dim, in_dim)`.
//! - Eigenvectors are stored as rows: `vecs[k*n..(k+1)*n]` pairs with
//!   eigenvalue `k`. [`symmetric_eigh`] returns eigenvalues ascending;
//!   "most important first" is an explicit re-ranking via
//!   [`truncate_by_magnitude`].
//!
//! # Quick start
//!
//! ```rust
//! use bilinear_mlp::{BilinearNet, Config, Dataset, FitConfig, Shuffle};
//!
//! # fn main() -> bilinear_mlp::Result<()> {
//! // XOR-ish: the product nonlinearity handles it with one block.
//! let inputs = vec![
//!     1.0, 1.0, //
//!     -1.0, -1.0, //
//!     -1.0, 1.0, //
//!     1.0, -1.0,
//! ];
//! let train = Dataset::from_labels(inputs, &[0, 0, 1, 1], 2, 2)?;
//!
//! let mut net = BilinearNet::new(Config {
//!     d_input: 2,
//!     d_hidden: 8,
//!     d_output: 2,
//!     n_layer: 1,
//!     ..Config::default()
//! })?;
//!
//! let _report = net.fit(
//!     &train,
//!     None,
//!     FitConfig {
//!         epochs: 50,
//!         lr: 1e-2,
//!         batch_size: 4,
//!         shuffle: Shuffle::Seeded(0),
//!         weight_decay: 0.0,
//!         ..FitConfig::default()
//!     },
//! )?;
//!
//! // The learned block decomposes into per-class eigen-directions.
//! let decomposition = net.decompose()?;
//! let _top_direction = decomposition.eigenvector(0, net.hidden_dim() - 1);
//! Ok(())
//! # }
//! ```

pub mod bilinear;
pub mod correlate;
pub mod data;
pub mod decompose;
pub mod eigen;
pub mod error;
pub mod layer;
pub(crate) mod linalg;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod sae;
pub mod train;

#[cfg(feature = "serde")]
pub mod artifact;

pub use bilinear::{Bilinear, BilinearGradients};
pub use correlate::{CorrelateConfig, CorrelationRecord, CorrelationReport, SparseVec};
pub use data::{Dataset, Inputs};
pub use decompose::{
    decompose, decompose_directions, interaction_tensor, truncate_by_magnitude, Decomposition,
    TruncatedEigenbasis,
};
pub use eigen::symmetric_eigh;
pub use error::{Error, Result};
pub use layer::Linear;
pub use loss::Loss;
pub use model::{BilinearNet, Config, Gradients, Scratch, Trainer};
pub use optim::{Optimizer, OptimizerState};
pub use sae::{SaeConfig, SaeFitConfig, SaeScratch, TopKSae};
pub use train::{EpochReport, EvalReport, FitConfig, FitReport, LrSchedule, Shuffle};

#[cfg(feature = "serde")]
pub use artifact::{cache_path, load_or_compute, DecompositionArtifact};
