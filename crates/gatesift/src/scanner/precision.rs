//! Micro phase: bidirectional squeezing of a short blocked fragment.
//!
//! Slice first, squeeze second: the forward scan isolates the minimal
//! blocking prefix before any left-edge work, so characters after the
//! keyword can never distort the squeeze. Both edges are located with
//! exponential-then-binary probing, which the monotone blocked/safe
//! boundary makes sound.

use gatesift_protocol::{Evidence, LogLevel, ProbeError};
use tracing::{debug, info, warn};

use crate::engine::probe::ProbeClient;
use crate::scanner::cancel::CancellationToken;
use crate::scanner::emitter::EventEmitter;
use crate::scanner::Candidate;

/// Locates exact keyword occurrences inside a short blocked fragment.
pub(crate) struct PrecisionScanner<'a> {
    probe: &'a ProbeClient,
    emitter: &'a EventEmitter,
    cancel: &'a CancellationToken,
    min_granularity: usize,
}

impl<'a> PrecisionScanner<'a> {
    pub fn new(
        probe: &'a ProbeClient,
        emitter: &'a EventEmitter,
        cancel: &'a CancellationToken,
        min_granularity: usize,
    ) -> Self {
        Self {
            probe,
            emitter,
            cancel,
            min_granularity: min_granularity.max(1),
        }
    }

    /// Scan a fragment known (or suspected) to be blocked. `base` is the
    /// absolute offset of `text[0]` in the original input. Returns every
    /// keyword occurrence found, left to right. Each confirmed keyword
    /// is registered in the mask registry before scanning continues, so
    /// the remaining tail is probed with it neutralized.
    pub async fn scan(&self, text: &[char], base: usize) -> Result<Vec<Candidate>, ProbeError> {
        let mut found = Vec::new();
        let mut offset = 0;

        while offset < text.len() {
            if self.cancel.is_cancelled() {
                debug!(base, offset, "precision scan cancelled");
                break;
            }

            let tail = &text[offset..];
            let Some((end, evidence)) = self.forward_scan(tail).await? else {
                // Remaining tail carries no blocking prefix.
                break;
            };

            if end < self.min_granularity {
                self.granularity_warning(base + offset, end).await;
                break;
            }

            let (start, squeeze_evidence) = self.squeeze_left(&tail[..end]).await?;
            let evidence = squeeze_evidence.unwrap_or(evidence);

            if end - start < self.min_granularity {
                self.granularity_warning(base + offset + start, end - start).await;
                break;
            }

            let keyword: String = tail[start..end].iter().collect();
            let candidate = Candidate {
                text: keyword.clone(),
                start: base + offset + start,
                end: base + offset + end,
                evidence,
            };
            info!(
                keyword = keyword.as_str(),
                start = candidate.start,
                end = candidate.end,
                "keyword located"
            );
            self.emitter
                .log(
                    LogLevel::Success,
                    format!(
                        "keyword located: '{}' at {}-{}",
                        keyword, candidate.start, candidate.end
                    ),
                )
                .await;

            self.probe.masks().add(&keyword);
            found.push(candidate);
            offset += end;
        }

        Ok(found)
    }

    /// Find the smallest `k` such that `tail[..k]` is blocked, probing
    /// lengths 1, 2, 4, ... and then bisecting the last bracket.
    /// Returns `None` when the whole tail is safe.
    async fn forward_scan(
        &self,
        tail: &[char],
    ) -> Result<Option<(usize, Evidence)>, ProbeError> {
        let len = tail.len();
        if len == 0 {
            return Ok(None);
        }

        let mut safe_below = 0; // largest length known safe
        let mut blocked_at = None; // smallest length known blocked
        let mut evidence = None;

        let mut k = 1usize;
        loop {
            let probe_len = k.min(len);
            match self.classify(&tail[..probe_len]).await? {
                Some(e) => {
                    blocked_at = Some(probe_len);
                    evidence = Some(e);
                    break;
                }
                None => {
                    safe_below = probe_len;
                    if probe_len == len {
                        return Ok(None);
                    }
                }
            }
            k *= 2;
        }

        let mut hi = blocked_at.unwrap_or(len);
        let mut lo = safe_below;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            match self.classify(&tail[..mid]).await? {
                Some(e) => {
                    hi = mid;
                    evidence = Some(e);
                }
                None => lo = mid,
            }
        }

        debug!(prefix_len = hi, "minimal blocking prefix found");
        Ok(evidence.map(|e| (hi, e)))
    }

    /// With the right edge fixed at `prefix.len()`, find the largest
    /// start `s` such that `prefix[s..]` is still blocked. The caller
    /// guarantees `prefix` itself (s = 0) is blocked.
    async fn squeeze_left(
        &self,
        prefix: &[char],
    ) -> Result<(usize, Option<Evidence>), ProbeError> {
        let end = prefix.len();
        // Keep at least min_granularity characters.
        let limit = end.saturating_sub(self.min_granularity);
        if limit == 0 {
            return Ok((0, None));
        }

        let mut blocked_at = 0; // largest start known blocked
        let mut safe_at = None; // smallest start known safe
        let mut evidence = None;

        let mut s = 1usize;
        while s <= limit {
            match self.classify(&prefix[s..]).await? {
                Some(e) => {
                    blocked_at = s;
                    evidence = Some(e);
                    if s == limit {
                        break;
                    }
                }
                None => {
                    safe_at = Some(s);
                    break;
                }
            }
            s *= 2;
        }

        let mut lo = blocked_at;
        let mut hi = safe_at.unwrap_or(limit + 1);
        while hi - lo > 1 {
            // lo < mid < hi <= limit + 1, so mid never exceeds limit.
            let mid = lo + (hi - lo) / 2;
            match self.classify(&prefix[mid..]).await? {
                Some(e) => {
                    lo = mid;
                    evidence = Some(e);
                }
                None => hi = mid,
            }
        }

        debug!(start = lo, end, "left edge squeezed");
        Ok((lo, evidence))
    }

    /// Blocked evidence, or `None` for any safe-for-progress outcome.
    async fn classify(&self, slice: &[char]) -> Result<Option<Evidence>, ProbeError> {
        let text: String = slice.iter().collect();
        match self.probe.classify(&text).await? {
            gatesift_protocol::Outcome::Blocked { evidence } => Ok(Some(evidence)),
            _ => Ok(None),
        }
    }

    async fn granularity_warning(&self, position: usize, length: usize) {
        warn!(position, length, "signal below resolvable granularity");
        self.emitter
            .warning(format!(
                "signal at {position} is below resolvable granularity ({length} < {})",
                self.min_granularity
            ))
            .await;
    }
}
