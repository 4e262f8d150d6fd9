//! Scan configuration snapshot.
//!
//! A `ScanConfig` is taken once at scan start and never changes while
//! the scan runs. `validate` is the gate: a scan refuses to start on an
//! out-of-range value or an inconsistent threshold/overlap pair.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Classification rules applied to every upstream response.
///
/// The three tables are disjoint by contract: a status code means block,
/// retry, or nothing. Body keywords fire regardless of status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Status codes meaning the text was rejected.
    #[serde(default)]
    pub block_status_codes: BTreeSet<u16>,
    /// Body substrings meaning the text was rejected, any status.
    #[serde(default)]
    pub block_keywords: Vec<String>,
    /// Status codes meaning a transient condition worth retrying.
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: BTreeSet<u16>,
}

fn default_retry_status_codes() -> BTreeSet<u16> {
    [429, 502, 503, 504].into_iter().collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            block_status_codes: BTreeSet::new(),
            block_keywords: Vec::new(),
            retry_status_codes: default_retry_status_codes(),
        }
    }
}

/// Immutable snapshot of every tunable, taken at scan start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    // Upstream connection.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Chat-completion body template; `{{TEXT}}` and `{{MODEL}}` are
    /// substituted per probe.
    pub request_template: String,

    // Probe client.
    pub concurrency: usize,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub jitter: f64,

    // Chunking and bisection.
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub min_granularity: usize,
    pub switch_threshold: usize,
    pub max_recursion_depth: u32,

    // Algorithm toggles.
    pub enable_triple_probe: bool,
    pub enable_middle_chunk_probe: bool,
    pub middle_chunk_overlap_factor: f64,
    pub enable_deduplication: bool,
    pub dedup_overlap_threshold: f64,
    pub dedup_adjacent_distance: usize,

    pub rules: RuleSet,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            request_template: DEFAULT_REQUEST_TEMPLATE.to_string(),
            concurrency: 15,
            timeout_seconds: 30,
            max_retries: 3,
            jitter: 0.5,
            chunk_size: 30_000,
            overlap_size: 12,
            min_granularity: 1,
            switch_threshold: 35,
            max_recursion_depth: 30,
            enable_triple_probe: true,
            enable_middle_chunk_probe: true,
            middle_chunk_overlap_factor: 1.0,
            enable_deduplication: true,
            dedup_overlap_threshold: 0.5,
            dedup_adjacent_distance: 30,
            rules: RuleSet::default(),
        }
    }
}

/// Default chat-completion request body.
pub const DEFAULT_REQUEST_TEMPLATE: &str = r#"{"model": "{{MODEL}}", "messages": [{"role": "user", "content": "{{TEXT}}"}], "stream": false}"#;

impl ScanConfig {
    /// Check every bound and the threshold/overlap invariant.
    ///
    /// `validate_connection` additionally requires a usable upstream
    /// endpoint; tests driving a mock transport skip that part.
    pub fn validate(&self) -> Result<(), ConfigError> {
        range(self.concurrency, 1, 50, "concurrency")?;
        range(self.timeout_seconds, 1, 120, "timeout_seconds")?;
        range(self.max_retries, 1, 10, "max_retries")?;
        range_f64(self.jitter, 0.0, 1.0, "jitter")?;
        range(self.chunk_size, 100, 1_000_000, "chunk_size")?;
        range(self.overlap_size, 0, 1000, "overlap_size")?;
        range(self.min_granularity, 1, 10, "min_granularity")?;
        range(self.switch_threshold, 20, 100, "switch_threshold")?;
        range(self.max_recursion_depth, 1, 100, "max_recursion_depth")?;
        range_f64(
            self.middle_chunk_overlap_factor,
            0.5,
            2.0,
            "middle_chunk_overlap_factor",
        )?;
        range_f64(
            self.dedup_overlap_threshold,
            0.0,
            1.0,
            "dedup_overlap_threshold",
        )?;

        // A split must always produce strictly shorter children, and the
        // chunker needs room for its overlap.
        if self.switch_threshold <= 2 * self.overlap_size {
            return Err(ConfigError::ThresholdOverlap {
                threshold: self.switch_threshold,
                overlap_size: self.overlap_size,
            });
        }
        if self.overlap_size >= self.chunk_size {
            return Err(ConfigError::OutOfRange {
                field: "overlap_size",
                value: self.overlap_size.to_string(),
                min: "0".into(),
                max: format!("chunk_size - 1 ({})", self.chunk_size - 1),
            });
        }

        Ok(())
    }

    /// `validate` plus the upstream connection fields.
    pub fn validate_connection(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingConnection("api_url"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingConnection("api_key"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::MissingConnection("model"));
        }
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(url.to_string()));
        }
        if !self.request_template.contains("{{TEXT}}") {
            return Err(ConfigError::Template(
                "request_template must contain a {{TEXT}} placeholder".into(),
            ));
        }

        Ok(())
    }
}

fn range<T>(value: T, min: T, max: T, field: &'static str) -> Result<(), ConfigError>
where
    T: PartialOrd + ToString,
{
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

fn range_f64(value: f64, min: f64, max: f64, field: &'static str) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}
