//! Response classification against the configured rule tables.

use gatesift_protocol::{Evidence, Outcome, RuleSet};
use tracing::debug;

/// Characters of body context kept on each side of a keyword match.
const CONTEXT_WINDOW: usize = 50;

/// Maps a raw HTTP response to an [`Outcome`].
///
/// Resolution order: retry status, then body keyword (any status), then
/// block status, then 2xx as safe; everything else is unknown. Body
/// keywords are checked before block statuses so the evidence names the
/// keyword that fired rather than a generic status code.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    rules: RuleSet,
}

impl RuleEvaluator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn evaluate(&self, status: u16, body: &str) -> Outcome {
        if self.rules.retry_status_codes.contains(&status) {
            debug!(status, "retryable status");
            return Outcome::Retry {
                status_code: status,
            };
        }

        for keyword in &self.rules.block_keywords {
            if !keyword.is_empty() && body.contains(keyword.as_str()) {
                debug!(status, keyword = keyword.as_str(), "block keyword matched");
                return Outcome::Blocked {
                    evidence: Evidence::keyword(keyword, extract_context(body, keyword)),
                };
            }
        }

        if self.rules.block_status_codes.contains(&status) {
            debug!(status, "block status matched");
            return Outcome::Blocked {
                evidence: Evidence::status_code(status),
            };
        }

        if (200..300).contains(&status) {
            return Outcome::Safe;
        }

        Outcome::Unknown {
            status_code: status,
        }
    }
}

/// A compact excerpt around the first occurrence of `keyword` in `body`,
/// with newlines flattened and ellipses marking truncation.
fn extract_context(body: &str, keyword: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let needle: Vec<char> = keyword.chars().collect();
    let Some(pos) = find_chars(&chars, &needle) else {
        return String::new();
    };

    let start = pos.saturating_sub(CONTEXT_WINDOW);
    let end = (pos + needle.len() + CONTEXT_WINDOW).min(chars.len());
    let excerpt: String = chars[start..end]
        .iter()
        .map(|&c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < chars.len() { "..." } else { "" };
    format!("{prefix}{}{suffix}", excerpt.trim())
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
