//! Shared vocabulary for the gatesift scanning engine.
//!
//! Everything a consumer needs to drive a scan and interpret its output
//! lives here: probe outcomes and block evidence, the scan configuration
//! snapshot, the rule tables applied to upstream responses, and the
//! event stream emitted while a scan runs.
//!
//! The engine itself lives in the `gatesift` crate; this crate is pure
//! data so frontends and tooling can depend on it without pulling in the
//! async stack.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{RuleSet, ScanConfig};
pub use error::{ConfigError, ProbeError};
pub use events::{LogLevel, ScanEvent};
pub use types::{Evidence, EvidenceKind, Finding, Outcome, ScanStats, Span};
