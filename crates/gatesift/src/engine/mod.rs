//! Probe engine: everything between a text fragment and an
//! accept/reject verdict from the upstream gateway.

pub mod mask;
pub mod probe;
pub mod request;
pub mod rules;
pub mod transport;

pub use mask::{MaskRegistry, MASK_CHAR};
pub use probe::ProbeClient;
pub use request::RequestBuilder;
pub use rules::RuleEvaluator;
pub use transport::{HttpTransport, ProbeTransport, RawResponse};
