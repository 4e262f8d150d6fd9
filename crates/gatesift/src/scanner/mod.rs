//! Scan orchestration: chunking, macro/micro search, verification, and
//! the event stream.

pub mod binary;
pub mod cancel;
pub mod coordinator;
pub mod emitter;
pub mod precision;
pub mod segmenter;
pub mod verify;

pub use cancel::CancellationToken;
pub use coordinator::{ScanCoordinator, ScanSummary};
pub use emitter::EventEmitter;

use gatesift_protocol::Evidence;

/// A possibly-keyword fragment emitted by the micro phase, pending
/// verification. Offsets are absolute character positions in the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// The rule that fired when this candidate was first confirmed.
    pub evidence: Evidence,
}
