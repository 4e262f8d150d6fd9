//! Macro phase: recursive binary contraction of a blocked fragment.
//!
//! Each split halves the fragment while carrying `overlap_size` extra
//! characters on both children, so a keyword no longer than the overlap
//! cannot vanish into the cut. The configured invariant
//! `switch_threshold > 2 * overlap_size` guarantees every child is
//! strictly shorter than its parent.

use futures::future::BoxFuture;
use futures::FutureExt;
use gatesift_protocol::{LogLevel, Outcome, ProbeError, ScanConfig};
use tracing::{debug, warn};

use crate::engine::probe::ProbeClient;
use crate::scanner::cancel::CancellationToken;
use crate::scanner::emitter::EventEmitter;
use crate::scanner::precision::PrecisionScanner;
use crate::scanner::Candidate;

/// Narrows a blocked fragment down to candidates via recursive
/// bisection, handing short fragments to the precision scanner.
pub(crate) struct BinarySearcher<'a> {
    probe: &'a ProbeClient,
    emitter: &'a EventEmitter,
    cancel: &'a CancellationToken,
    config: &'a ScanConfig,
}

impl<'a> BinarySearcher<'a> {
    pub fn new(
        probe: &'a ProbeClient,
        emitter: &'a EventEmitter,
        cancel: &'a CancellationToken,
        config: &'a ScanConfig,
    ) -> Self {
        Self {
            probe,
            emitter,
            cancel,
            config,
        }
    }

    /// Search a fragment the caller has already confirmed BLOCKED.
    /// `base` is the absolute offset of `text[0]`.
    pub async fn search(&self, text: &[char], base: usize) -> Result<Vec<Candidate>, ProbeError> {
        self.recurse(text, base, 0).await
    }

    fn precision(&self) -> PrecisionScanner<'_> {
        PrecisionScanner::new(
            self.probe,
            self.emitter,
            self.cancel,
            self.config.min_granularity,
        )
    }

    fn recurse<'b>(
        &'b self,
        text: &'b [char],
        base: usize,
        depth: u32,
    ) -> BoxFuture<'b, Result<Vec<Candidate>, ProbeError>> {
        async move {
            if self.cancel.is_cancelled() || text.is_empty() {
                return Ok(Vec::new());
            }

            let len = text.len();
            if len <= self.config.switch_threshold {
                debug!(depth, len, base, "handing fragment to precision scan");
                return self.precision().scan(text, base).await;
            }
            if depth >= self.config.max_recursion_depth {
                warn!(depth, len, "recursion cap reached, forcing precision scan");
                self.emitter
                    .warning(format!(
                        "recursion depth cap reached on a fragment of {len} chars, \
                         switching to precision scan"
                    ))
                    .await;
                return self.precision().scan(text, base).await;
            }

            let mid = len / 2;
            // Clamped so both children stay strictly shorter than the
            // parent even under degenerate settings.
            let overlap = self.config.overlap_size.min((len - 1) / 2);

            let left = &text[..(mid + overlap).min(len)];
            let right_start = mid - overlap;
            let right = &text[right_start..];

            let middle = if self.config.enable_middle_chunk_probe {
                let half_width =
                    (self.config.middle_chunk_overlap_factor * overlap as f64).ceil() as usize;
                let lo = mid.saturating_sub(half_width);
                let hi = (mid + half_width).min(len);
                (hi > lo && hi - lo < len).then_some((lo, &text[lo..hi]))
            } else {
                None
            };

            self.emitter
                .log(
                    LogLevel::Warning,
                    format!("bisecting blocked fragment of {len} chars (depth {})", depth + 1),
                )
                .await;

            let (left_out, right_out, middle_out, full_out) = tokio::join!(
                self.classify_slice(left),
                self.classify_slice(right),
                self.classify_optional(middle.map(|(_, slice)| slice)),
                self.classify_optional(self.config.enable_triple_probe.then_some(text)),
            );
            let left_out = left_out?;
            let right_out = right_out?;
            let middle_out = middle_out.transpose()?;
            let full_out = full_out.transpose()?;

            // Masking of keywords found elsewhere can have neutralized
            // this whole fragment while it sat in the queue.
            if let Some(outcome) = &full_out {
                if !outcome.is_blocked() {
                    debug!(depth, len, base, "fragment inert after masking, pruned");
                    return Ok(Vec::new());
                }
            }

            let mut found = Vec::new();
            let mut any_blocked = false;

            if left_out.is_blocked() {
                any_blocked = true;
                found.extend(self.recurse(left, base, depth + 1).await?);
            }
            if right_out.is_blocked() {
                any_blocked = true;
                found.extend(self.recurse(right, base + right_start, depth + 1).await?);
            }
            if let (Some((middle_lo, middle_slice)), Some(outcome)) = (middle, middle_out) {
                if outcome.is_blocked() {
                    any_blocked = true;
                    found.extend(
                        self.recurse(middle_slice, base + middle_lo, depth + 1).await?,
                    );
                }
            }

            if !any_blocked {
                // A keyword straddling the cut beyond the overlap's
                // reach: every piece is safe while the whole is not.
                debug!(depth, len, base, "blocked parent with safe pieces, precision scan");
                return self.precision().scan(text, base).await;
            }

            Ok(found)
        }
        .boxed()
    }

    async fn classify_slice(&self, slice: &[char]) -> Result<Outcome, ProbeError> {
        let text: String = slice.iter().collect();
        self.probe.classify(&text).await
    }

    async fn classify_optional(
        &self,
        slice: Option<&[char]>,
    ) -> Option<Result<Outcome, ProbeError>> {
        match slice {
            Some(slice) => Some(self.classify_slice(slice).await),
            None => None,
        }
    }
}
