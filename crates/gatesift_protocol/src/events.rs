//! The outbound event stream.
//!
//! Events are delivered in order per scan over a bounded channel.
//! `log` events are droppable under backpressure; everything else is
//! delivered (the emitter awaits channel capacity).

use crate::types::{Evidence, Span};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Sensitive-word locations grouped by keyword, `{keyword -> [spans]}`.
pub type GroupedResults = BTreeMap<String, Vec<Span>>;

/// One message on the scan event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStart {
        total_length: usize,
        segment_size: usize,
    },

    Progress {
        scanned: usize,
        total: usize,
        percentage: u8,
        sensitive_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<GroupedResults>,
    },

    Log {
        level: LogLevel,
        message: String,
    },

    Warning {
        message: String,
    },

    Error {
        message: String,
    },

    UnknownStatusCode {
        status_code: u16,
        response_snippet: String,
    },

    ScanComplete {
        sensitive_count: usize,
        total_requests: u64,
        results: GroupedResults,
        unknown_status_code_counts: BTreeMap<u16, u64>,
        sensitive_word_evidence: BTreeMap<String, Evidence>,
        duration_seconds: f64,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        partial: bool,
    },
}

impl ScanEvent {
    /// Whether the event may be discarded when the consumer lags.
    /// Progress and terminal events must never be dropped.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ScanEvent::Log { .. })
    }
}
