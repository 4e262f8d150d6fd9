//! Chat-completion request construction.
//!
//! The probe text is spliced into a JSON body template as a single user
//! message. `max_tokens` is pinned low: the reply content is irrelevant,
//! only the gateway's verdict matters.

use gatesift_protocol::{ProbeError, ScanConfig};
use serde_json::Value;
use tracing::debug;

/// Upper bound on completion tokens requested per probe.
const PROBE_MAX_TOKENS: u64 = 10;

/// Builds the upstream POST for one probe text.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    model: String,
    template: String,
}

impl RequestBuilder {
    /// Connection fields are assumed validated (`ScanConfig::validate_connection`).
    pub fn new(config: &ScanConfig) -> Self {
        let mut base = config.api_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            url: format!("{base}chat/completions"),
            model: config.model.clone(),
            template: config.request_template.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Substitute the probe text and model into the template and parse
    /// the resulting JSON body.
    pub fn build(&self, text: &str) -> Result<Value, ProbeError> {
        // serde_json::to_string yields a quoted JSON string; the inner
        // slice is exactly the escaped form safe to splice into the
        // template.
        let quoted = serde_json::to_string(text)
            .map_err(|e| ProbeError::RequestBuild(format!("text escaping failed: {e}")))?;
        let escaped = &quoted[1..quoted.len() - 1];

        let rendered = self
            .template
            .replace("{{TEXT}}", escaped)
            .replace("{{MODEL}}", &self.model);
        if rendered.contains("{{TEXT}}") || rendered.contains("{{MODEL}}") {
            return Err(ProbeError::RequestBuild(
                "unreplaced placeholder left in request template".into(),
            ));
        }

        let mut body: Value = serde_json::from_str(&rendered)
            .map_err(|e| ProbeError::RequestBuild(format!("template is not valid JSON: {e}")))?;
        let Some(map) = body.as_object_mut() else {
            return Err(ProbeError::RequestBuild(
                "request template must be a JSON object".into(),
            ));
        };
        map.insert("max_tokens".into(), PROBE_MAX_TOKENS.into());

        debug!(url = self.url.as_str(), text_len = text.chars().count(), "request built");
        Ok(body)
    }
}
