//! Decomposition cache artifact (feature: `serde`).
//!
//! Recomputing a truncated eigenbasis over thousands of features is the
//! expensive step of an analysis run, so it is cached to a keyed on-disk
//! artifact.
//!
//! Design notes:
//! - We do NOT serialize `TruncatedEigenbasis` directly; the artifact is a
//!   versioned, flat name-to-tensor mapping so the file format stays stable
//!   even if the in-memory representation changes.
//! - Deserialization validates the version, all dimensions, and that every
//!   value is finite.
//! - `load_or_compute` is read-before-write: check existence, compute and
//!   write if absent. Concurrent-writer discipline is the caller's concern.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::decompose::TruncatedEigenbasis;
use crate::{Error, Result};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// On-disk form of a truncated eigenbasis, keyed by model name and layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionArtifact {
    pub format_version: u32,
    pub model_name: String,
    pub layer: usize,
    pub features: usize,
    pub hidden: usize,
    pub k: usize,
    /// Row-major (features, k).
    pub eigenvalues: Vec<f32>,
    /// Row-major (features, k, hidden).
    pub eigenvectors: Vec<f32>,
}

impl DecompositionArtifact {
    pub fn new(model_name: &str, layer: usize, basis: &TruncatedEigenbasis) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_name: model_name.to_owned(),
            layer,
            features: basis.features(),
            hidden: basis.hidden(),
            k: basis.k(),
            eigenvalues: basis.eigenvalues.clone(),
            eigenvectors: basis.eigenvectors.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported artifact format_version {}; expected {ARTIFACT_FORMAT_VERSION}",
                self.format_version
            )));
        }
        if self.features == 0 || self.hidden == 0 || self.k == 0 || self.k > self.hidden {
            return Err(Error::InvalidData(format!(
                "artifact dims are inconsistent: features={} hidden={} k={}",
                self.features, self.hidden, self.k
            )));
        }
        if self.eigenvalues.len() != self.features * self.k {
            return Err(Error::InvalidData(format!(
                "eigenvalues length {} does not match features * k ({} * {})",
                self.eigenvalues.len(),
                self.features,
                self.k
            )));
        }
        if self.eigenvectors.len() != self.features * self.k * self.hidden {
            return Err(Error::InvalidData(format!(
                "eigenvectors length {} does not match features * k * hidden ({} * {} * {})",
                self.eigenvectors.len(),
                self.features,
                self.k,
                self.hidden
            )));
        }
        if self
            .eigenvalues
            .iter()
            .chain(self.eigenvectors.iter())
            .any(|v| !v.is_finite())
        {
            return Err(Error::InvalidData(
                "artifact tensors must contain only finite values".to_owned(),
            ));
        }
        Ok(())
    }

    /// Validate and convert back into an in-memory eigenbasis.
    pub fn into_basis(self) -> Result<TruncatedEigenbasis> {
        self.validate()?;
        Ok(TruncatedEigenbasis {
            features: self.features,
            hidden: self.hidden,
            k: self.k,
            eigenvalues: self.eigenvalues,
            eigenvectors: self.eigenvectors,
        })
    }
}

/// Cache key: `"{model_name}-vecs{layer}.json"`.
pub fn cache_file_name(model_name: &str, layer: usize) -> String {
    format!("{model_name}-vecs{layer}.json")
}

/// Full cache path for `(model_name, layer)` under `dir`.
pub fn cache_path(dir: &Path, model_name: &str, layer: usize) -> PathBuf {
    dir.join(cache_file_name(model_name, layer))
}

impl TruncatedEigenbasis {
    /// Save as a keyed artifact (pretty-printed JSON).
    pub fn save_artifact<P: AsRef<Path>>(
        &self,
        path: P,
        model_name: &str,
        layer: usize,
    ) -> Result<()> {
        let artifact = DecompositionArtifact::new(model_name, layer, self);
        let s = serde_json::to_string_pretty(&artifact)
            .map_err(|e| Error::InvalidData(format!("failed to serialize artifact: {e}")))?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))?;
        Ok(())
    }

    /// Load and validate a previously saved artifact.
    pub fn load_artifact<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidData(format!("failed to read {}: {e}", p.display())))?;
        let artifact: DecompositionArtifact = serde_json::from_str(&s)
            .map_err(|e| Error::InvalidData(format!("failed to parse artifact json: {e}")))?;
        artifact.into_basis()
    }
}

/// Return the cached eigenbasis for `(model_name, layer)` under `dir`,
/// computing and writing it if absent.
pub fn load_or_compute<F>(
    dir: &Path,
    model_name: &str,
    layer: usize,
    compute: F,
) -> Result<TruncatedEigenbasis>
where
    F: FnOnce() -> Result<TruncatedEigenbasis>,
{
    let path = cache_path(dir, model_name, layer);
    if path.exists() {
        return TruncatedEigenbasis::load_artifact(&path);
    }
    let basis = compute()?;
    basis.save_artifact(&path, model_name, layer)?;
    Ok(basis)
}
