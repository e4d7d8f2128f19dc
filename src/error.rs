use std::fmt;

/// Crate-wide error type.
///
/// Shape and config errors are fatal and surface before any computation
/// runs. Statistically unreliable analysis inputs are never errors; the
/// correlation evaluator filters and counts them instead.
#[derive(Debug, Clone)]
pub enum Error {
    /// Tensor dimensions are inconsistent (e.g. `L`/`R` not square, or
    /// `W_u` columns not matching the hidden dimension).
    InvalidShape(String),
    /// Bad hyperparameters or an unsupported model configuration.
    InvalidConfig(String),
    /// Malformed datasets or persistence failures (I/O and serialization
    /// errors are wrapped with their path/context).
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
