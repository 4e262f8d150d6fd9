//! Event delivery to the external progress consumer.
//!
//! Events ride a bounded mpsc channel. The core never blocks on a slow
//! consumer for `log` events (they are dropped under backpressure);
//! progress and terminal events await channel capacity so they are
//! never lost while the consumer is alive.

use gatesift_protocol::events::GroupedResults;
use gatesift_protocol::{Evidence, LogLevel, ScanEvent};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Cheap-clone sender side of the scan event stream.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<ScanEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<ScanEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: ScanEvent) {
        if event.is_droppable() {
            if let Err(err) = self.tx.try_send(event) {
                debug!(?err, "log event dropped");
            }
        } else if self.tx.send(event).await.is_err() {
            debug!("event consumer gone, event discarded");
        }
    }

    pub async fn scan_start(&self, total_length: usize, segment_size: usize) {
        self.emit(ScanEvent::ScanStart {
            total_length,
            segment_size,
        })
        .await;
    }

    pub async fn progress(
        &self,
        scanned: usize,
        total: usize,
        sensitive_count: usize,
        results: Option<GroupedResults>,
    ) {
        let percentage = if total > 0 {
            ((scanned * 100) / total).min(100) as u8
        } else {
            0
        };
        self.emit(ScanEvent::Progress {
            scanned,
            total,
            percentage,
            sensitive_count,
            results,
        })
        .await;
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(ScanEvent::Log {
            level,
            message: message.into(),
        })
        .await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.emit(ScanEvent::Warning {
            message: message.into(),
        })
        .await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.emit(ScanEvent::Error {
            message: message.into(),
        })
        .await;
    }

    pub async fn unknown_status_code(&self, status_code: u16, response_snippet: String) {
        self.emit(ScanEvent::UnknownStatusCode {
            status_code,
            response_snippet,
        })
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn scan_complete(
        &self,
        sensitive_count: usize,
        total_requests: u64,
        results: GroupedResults,
        unknown_status_code_counts: BTreeMap<u16, u64>,
        sensitive_word_evidence: BTreeMap<String, Evidence>,
        duration_seconds: f64,
        cancelled: bool,
        partial: bool,
    ) {
        self.emit(ScanEvent::ScanComplete {
            sensitive_count,
            total_requests,
            results,
            unknown_status_code_counts,
            sensitive_word_evidence,
            duration_seconds,
            cancelled,
            partial,
        })
        .await;
    }
}
