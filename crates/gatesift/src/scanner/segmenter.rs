//! Pre-chunking of long inputs.
//!
//! Adjacent chunks overlap by `overlap_size` characters so a keyword
//! straddling a boundary is fully contained in at least one chunk. Each
//! chunk also knows its *novel* length (the part not shared with the
//! previous chunk), which is what progress accounting sums to reach
//! exactly the input length.

use tracing::{debug, warn};

/// One chunk of the input, in absolute character coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub start: usize,
    pub end: usize,
    /// Characters not covered by the previous chunk.
    pub novel: usize,
}

/// Splits an input length into overlapping chunks.
#[derive(Debug, Clone)]
pub(crate) struct TextSegmenter {
    segment_size: usize,
    overlap_size: usize,
}

impl TextSegmenter {
    /// Degenerate settings are clamped here as a second line of defense;
    /// `ScanConfig::validate` is the real gate.
    pub fn new(segment_size: usize, overlap_size: usize) -> Self {
        let segment_size = segment_size.max(1);
        let overlap_size = if overlap_size >= segment_size {
            warn!(
                overlap_size,
                segment_size, "overlap too large for segment size, halving"
            );
            segment_size / 2
        } else {
            overlap_size
        };
        Self {
            segment_size,
            overlap_size,
        }
    }

    pub fn split(&self, total_len: usize) -> Vec<Chunk> {
        if total_len == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut covered = 0;
        while start < total_len {
            let end = (start + self.segment_size).min(total_len);
            chunks.push(Chunk {
                start,
                end,
                novel: end - covered,
            });
            covered = end;
            if end >= total_len {
                break;
            }

            let next_start = end - self.overlap_size;
            if next_start <= start {
                // Overlap ate the whole stride; bail with the remainder.
                chunks.push(Chunk {
                    start: end,
                    end: total_len,
                    novel: total_len - covered,
                });
                break;
            }
            start = next_start;
        }

        debug!(
            chunks = chunks.len(),
            segment_size = self.segment_size,
            overlap_size = self.overlap_size,
            "input segmented"
        );
        chunks
    }
}
