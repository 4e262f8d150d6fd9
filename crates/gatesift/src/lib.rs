//! gatesift: adaptive sensitive-word localization.
//!
//! Given a probe endpoint whose only observable behavior is accept vs
//! reject, recover the exact substrings of an input text that trigger
//! rejection, with character-accurate offsets, in as few probe calls as
//! possible.
//!
//! The pipeline: chunk the input, binary-contract each blocked chunk
//! down to short fragments (macro phase), squeeze each fragment to a
//! minimal keyword (micro phase), then verify, reduce, and recount the
//! candidates against the original text. Every keyword found along the
//! way is masked out of later probes, so repeated occurrences cost
//! nothing.
//!
//! Entry point: [`scanner::ScanCoordinator`]. Wire it to the real
//! gateway with [`engine::HttpTransport`], or to any
//! [`engine::ProbeTransport`] implementation for testing.

pub mod config_file;
pub mod engine;
pub mod scanner;

pub use engine::{HttpTransport, MaskRegistry, ProbeClient, ProbeTransport, RawResponse};
pub use scanner::{CancellationToken, ScanCoordinator, ScanSummary};
