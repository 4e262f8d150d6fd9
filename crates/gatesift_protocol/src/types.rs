//! Core data model: probe outcomes, block evidence, findings.
//!
//! All positions are half-open `[start, end)` ranges of *character*
//! offsets into the original input text. The coordinate system never
//! changes during a scan: masking is equal-length, so offsets reported
//! by any stage remain valid against the original input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict for a single probe of the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The gateway accepted the text.
    Safe,
    /// The gateway rejected the text; `evidence` records which rule fired.
    Blocked { evidence: Evidence },
    /// Transient upstream condition; the probe must be reattempted.
    Retry { status_code: u16 },
    /// Status code matched no rule. Counted, treated as safe for progress.
    Unknown { status_code: u16 },
}

impl Outcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Outcome::Blocked { .. })
    }

    pub fn is_safe_for_progress(&self) -> bool {
        matches!(self, Outcome::Safe | Outcome::Unknown { .. })
    }
}

/// Which rule caused a BLOCKED verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// A configured keyword appeared in the response body.
    Keyword,
    /// The HTTP status code is in the block list.
    StatusCode,
}

/// The rule that first classified a probe as BLOCKED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub value: String,
    /// Response-body excerpt around a keyword match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Evidence {
    pub fn keyword(value: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Keyword,
            value: value.into(),
            context: Some(context.into()),
        }
    }

    pub fn status_code(code: u16) -> Self {
        Self {
            kind: EvidenceKind::StatusCode,
            value: code.to_string(),
            context: None,
        }
    }
}

/// A half-open character range over the original input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A confirmed sensitive word and every place it occurs in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub keyword: String,
    pub locations: Vec<Span>,
    pub evidence: Evidence,
}

/// Probe counters for one scan. `request_count` counts every network
/// attempt, including retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub request_count: u64,
    pub blocked_count: u64,
    pub safe_count: u64,
    pub error_count: u64,
}
