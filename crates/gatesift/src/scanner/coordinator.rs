//! Top-level scan driver.
//!
//! Chunks the input, runs the macro→micro pipeline over every blocked
//! chunk concurrently (the probe semaphore is the only throttle), then
//! verifies, reduces, and recounts the candidates. Progress, partial
//! results, and the final report all flow through the event channel.

use futures::future::join_all;
use gatesift_protocol::events::GroupedResults;
use gatesift_protocol::{
    ConfigError, Evidence, Finding, LogLevel, ProbeError, ScanConfig, ScanEvent, ScanStats, Span,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::engine::probe::ProbeClient;
use crate::engine::transport::ProbeTransport;
use crate::scanner::binary::BinarySearcher;
use crate::scanner::cancel::CancellationToken;
use crate::scanner::emitter::EventEmitter;
use crate::scanner::segmenter::{Chunk, TextSegmenter};
use crate::scanner::verify::Verifier;
use crate::scanner::Candidate;

/// Result of one scan, mirroring the `scan_complete` event.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub findings: Vec<Finding>,
    pub stats: ScanStats,
    pub unknown_status_code_counts: BTreeMap<u16, u64>,
    pub cancelled: bool,
    pub partial: bool,
    pub duration_seconds: f64,
}

/// Drives one scan at a time against a probe transport.
pub struct ScanCoordinator {
    config: ScanConfig,
    transport: Arc<dyn ProbeTransport>,
    events: mpsc::Sender<ScanEvent>,
    cancel: CancellationToken,
}

/// Shared accumulator the concurrent chunk tasks write into.
#[derive(Default)]
struct LiveResults {
    scanned: AtomicUsize,
    /// Every harvested occurrence as `(start, end, keyword)`.
    occurrences: Mutex<BTreeSet<(usize, usize, String)>>,
    /// First-confirmation evidence per keyword.
    evidence: Mutex<BTreeMap<String, Evidence>>,
    /// Serializes the advance-and-emit step so `scanned` values appear
    /// on the event stream in non-decreasing order.
    progress_gate: tokio::sync::Mutex<()>,
}

impl LiveResults {
    fn grouped(&self) -> GroupedResults {
        let occurrences = self.occurrences.lock().unwrap_or_else(|e| e.into_inner());
        let mut grouped = GroupedResults::new();
        for (start, end, keyword) in occurrences.iter() {
            grouped
                .entry(keyword.clone())
                .or_default()
                .push(Span::new(*start, *end));
        }
        grouped
    }

    fn count(&self) -> usize {
        self.occurrences
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn evidence_map(&self) -> BTreeMap<String, Evidence> {
        self.evidence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ScanCoordinator {
    pub fn new(
        config: ScanConfig,
        transport: Arc<dyn ProbeTransport>,
        events: mpsc::Sender<ScanEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for requesting cancellation of the running scan.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one scan over `text`. Configuration problems refuse to run;
    /// probe failures and cancellation finish with a partial summary.
    pub async fn scan(&self, text: &str) -> Result<ScanSummary, ConfigError> {
        let emitter = EventEmitter::new(self.events.clone());

        if let Err(e) = self.config.validate() {
            error!(error = %e, "refusing to scan with invalid configuration");
            emitter.error(format!("configuration error: {e}")).await;
            return Err(e);
        }

        let started = Instant::now();
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let probe = ProbeClient::new(
            &self.config,
            Arc::clone(&self.transport),
            emitter.clone(),
            self.cancel.clone(),
        );

        emitter.scan_start(total, self.config.chunk_size).await;
        info!(total, "scan started");

        if total == 0 {
            let summary = ScanSummary {
                findings: Vec::new(),
                stats: probe.stats(),
                unknown_status_code_counts: BTreeMap::new(),
                cancelled: false,
                partial: false,
                duration_seconds: started.elapsed().as_secs_f64(),
            };
            emitter
                .scan_complete(
                    0,
                    0,
                    GroupedResults::new(),
                    BTreeMap::new(),
                    BTreeMap::new(),
                    summary.duration_seconds,
                    false,
                    false,
                )
                .await;
            return Ok(summary);
        }

        let chunks =
            TextSegmenter::new(self.config.chunk_size, self.config.overlap_size).split(total);
        emitter
            .log(
                LogLevel::Info,
                format!("input of {total} chars split into {} chunk(s)", chunks.len()),
            )
            .await;

        let live = LiveResults::default();
        let candidates: Mutex<Vec<Candidate>> = Mutex::new(Vec::new());

        let tasks = chunks
            .iter()
            .map(|chunk| self.process_chunk(*chunk, &chars, &probe, &emitter, &live, &candidates));
        let outcomes = join_all(tasks).await;
        let fatal = outcomes.into_iter().find_map(Result::err);

        if let Some(e) = fatal {
            error!(error = %e, "scan aborted on fatal probe failure");
            emitter.error(format!("scan aborted: {e}")).await;
            return Ok(self
                .finish_partial(&probe, &emitter, &live, started, self.cancel.is_cancelled())
                .await);
        }

        if self.cancel.is_cancelled() {
            warn!("scan cancelled, skipping verification");
            return Ok(self.finish_partial(&probe, &emitter, &live, started, true).await);
        }

        let collected = candidates.into_inner().unwrap_or_else(|e| e.into_inner());
        let collected = if self.config.enable_deduplication {
            dedup_candidates(
                collected,
                self.config.dedup_overlap_threshold,
                self.config.dedup_adjacent_distance,
            )
        } else {
            collected
        };

        let verifier = Verifier::new(&probe, &emitter);
        let findings = match verifier.run(collected, &chars).await {
            Ok(findings) => findings,
            Err(e) => {
                error!(error = %e, "verification aborted on fatal probe failure");
                emitter.error(format!("verification aborted: {e}")).await;
                return Ok(self
                    .finish_partial(&probe, &emitter, &live, started, self.cancel.is_cancelled())
                    .await);
            }
        };

        let grouped = group_findings(&findings);
        let sensitive_count: usize = findings.iter().map(|f| f.locations.len()).sum();
        let evidence: BTreeMap<String, Evidence> = findings
            .iter()
            .map(|f| (f.keyword.clone(), f.evidence.clone()))
            .collect();

        // The bar always reaches 100% before completion.
        emitter
            .progress(total, total, sensitive_count, Some(grouped.clone()))
            .await;

        let stats = probe.stats();
        let duration_seconds = started.elapsed().as_secs_f64();
        emitter
            .scan_complete(
                sensitive_count,
                stats.request_count,
                grouped,
                probe.unknown_status_code_counts(),
                evidence,
                duration_seconds,
                false,
                false,
            )
            .await;

        info!(
            sensitive_count,
            total_requests = stats.request_count,
            duration_seconds,
            "scan complete"
        );

        Ok(ScanSummary {
            findings,
            stats,
            unknown_status_code_counts: probe.unknown_status_code_counts(),
            cancelled: false,
            partial: false,
            duration_seconds,
        })
    }

    async fn process_chunk(
        &self,
        chunk: Chunk,
        chars: &[char],
        probe: &ProbeClient,
        emitter: &EventEmitter,
        live: &LiveResults,
        candidates: &Mutex<Vec<Candidate>>,
    ) -> Result<(), ProbeError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let slice = &chars[chunk.start..chunk.end];
        let chunk_text: String = slice.iter().collect();
        let outcome = match probe.classify(&chunk_text).await {
            Ok(outcome) => outcome,
            Err(ProbeError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        };

        if outcome.is_blocked() {
            emitter
                .log(
                    LogLevel::Info,
                    format!(
                        "chunk {}-{} blocked, starting deep scan",
                        chunk.start, chunk.end
                    ),
                )
                .await;
            let searcher = BinarySearcher::new(probe, emitter, &self.cancel, &self.config);
            let found = match searcher.search(slice, chunk.start).await {
                Ok(found) => found,
                Err(ProbeError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };
            for candidate in found {
                harvest(&candidate, chars, live);
                candidates
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(candidate);
            }
        }

        let _gate = live.progress_gate.lock().await;
        let scanned = live.scanned.fetch_add(chunk.novel, Ordering::SeqCst) + chunk.novel;
        emitter
            .progress(
                scanned.min(chars.len()),
                chars.len(),
                live.count(),
                Some(live.grouped()),
            )
            .await;
        Ok(())
    }

    /// Terminal path for cancelled and aborted scans: emit whatever was
    /// gathered, unverified.
    async fn finish_partial(
        &self,
        probe: &ProbeClient,
        emitter: &EventEmitter,
        live: &LiveResults,
        started: Instant,
        cancelled: bool,
    ) -> ScanSummary {
        let grouped = live.grouped();
        let evidence = live.evidence_map();
        let sensitive_count = live.count();
        let stats = probe.stats();
        let duration_seconds = started.elapsed().as_secs_f64();

        let findings = grouped
            .iter()
            .filter_map(|(keyword, spans)| {
                evidence.get(keyword).map(|e| Finding {
                    keyword: keyword.clone(),
                    locations: spans.clone(),
                    evidence: e.clone(),
                })
            })
            .collect();

        emitter
            .scan_complete(
                sensitive_count,
                stats.request_count,
                grouped,
                probe.unknown_status_code_counts(),
                evidence,
                duration_seconds,
                cancelled,
                true,
            )
            .await;

        ScanSummary {
            findings,
            stats,
            unknown_status_code_counts: probe.unknown_status_code_counts(),
            cancelled,
            partial: true,
            duration_seconds,
        }
    }
}

/// One discovery, globally harvested: every occurrence of the keyword in
/// the full input joins the live result set, so repeats found in one
/// place are never probed again elsewhere.
fn harvest(candidate: &Candidate, chars: &[char], live: &LiveResults) {
    let needle: Vec<char> = candidate.text.chars().collect();
    if needle.is_empty() {
        return;
    }

    let mut occurrences = live.occurrences.lock().unwrap_or_else(|e| e.into_inner());
    let mut i = 0;
    while i + needle.len() <= chars.len() {
        if chars[i..i + needle.len()] == needle[..] {
            occurrences.insert((i, i + needle.len(), candidate.text.clone()));
            i += needle.len();
        } else {
            i += 1;
        }
    }
    drop(occurrences);

    live.evidence
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(candidate.text.clone())
        .or_insert_with(|| candidate.evidence.clone());
}

fn group_findings(findings: &[Finding]) -> GroupedResults {
    findings
        .iter()
        .map(|f| (f.keyword.clone(), f.locations.clone()))
        .collect()
}

/// Merge near-duplicate detections of the same trigger: two candidates
/// are duplicates when their spans overlap enough (or sit within the
/// adjacency distance) *and* one text contains the other. The shorter
/// text wins. Distinct keywords that merely sit close together are
/// never merged.
fn dedup_candidates(
    mut candidates: Vec<Candidate>,
    overlap_threshold: f64,
    adjacent_distance: usize,
) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (c.start, c.end));

    let mut kept: Vec<Candidate> = Vec::new();
    'next: for candidate in candidates {
        for existing in kept.iter_mut() {
            if is_duplicate(existing, &candidate, overlap_threshold, adjacent_distance) {
                if candidate.text.chars().count() < existing.text.chars().count() {
                    *existing = candidate;
                }
                continue 'next;
            }
        }
        kept.push(candidate);
    }
    kept
}

fn is_duplicate(
    a: &Candidate,
    b: &Candidate,
    overlap_threshold: f64,
    adjacent_distance: usize,
) -> bool {
    if !(a.text.contains(&b.text) || b.text.contains(&a.text)) {
        return false;
    }

    let overlap_len = a.end.min(b.end).saturating_sub(a.start.max(b.start));
    let shorter = (a.end - a.start).min(b.end - b.start).max(1);
    if overlap_len as f64 / shorter as f64 >= overlap_threshold {
        return true;
    }

    let gap = if b.start > a.end {
        b.start - a.end
    } else if a.start > b.end {
        a.start - b.end
    } else {
        0
    };
    gap <= adjacent_distance
}
