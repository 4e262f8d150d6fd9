//! Error types shared across the engine crates.

use thiserror::Error;

/// A configuration problem detected at scan start. The scan refuses to
/// run; no partial results are produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    /// The macro/micro handover would stop shrinking fragments.
    #[error(
        "switch_threshold ({threshold}) must be greater than twice overlap_size ({overlap_size})"
    )]
    ThresholdOverlap {
        threshold: usize,
        overlap_size: usize,
    },

    #[error("missing connection setting: {0}")]
    MissingConnection(&'static str),

    #[error("invalid api_url '{0}': must start with http:// or https://")]
    InvalidApiUrl(String),

    #[error("request template error: {0}")]
    Template(String),
}

/// A probe that could not produce an outcome. Transient conditions are
/// retried inside the probe client; this surfaces only once retries are
/// exhausted or a request cannot be built at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to build probe request: {0}")]
    RequestBuild(String),

    #[error("probe failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The scan was cancelled while this probe waited for a permit.
    /// Not a failure; the coordinator folds it into the partial result.
    #[error("scan cancelled")]
    Cancelled,
}
