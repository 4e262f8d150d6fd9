//! Three-stage refinement of the candidate list.
//!
//! Stage 1 re-probes every candidate bare (mask bypassed) and drops the
//! ones the gateway now accepts: long-phrase artifacts born from context
//! interactions. Stage 2 reduces containment, keeping the shortest
//! trigger of each family. Stage 3 throws away all collected offsets
//! and recounts every surviving keyword against the original input, so
//! the final locations are exact regardless of how messy discovery was.

use futures::future::try_join_all;
use gatesift_protocol::{Evidence, Finding, LogLevel, ProbeError, Span};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::engine::probe::ProbeClient;
use crate::scanner::emitter::EventEmitter;
use crate::scanner::Candidate;

pub(crate) struct Verifier<'a> {
    probe: &'a ProbeClient,
    emitter: &'a EventEmitter,
}

impl<'a> Verifier<'a> {
    pub fn new(probe: &'a ProbeClient, emitter: &'a EventEmitter) -> Self {
        Self { probe, emitter }
    }

    /// Run all three stages over the collected candidates.
    pub async fn run(
        &self,
        candidates: Vec<Candidate>,
        original: &[char],
    ) -> Result<Vec<Finding>, ProbeError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let survivors = self.reprobe(candidates).await?;
        let retained = reduce_containment(&survivors);
        let findings = recount(&retained, original);

        info!(
            verified = survivors.len(),
            keywords = findings.len(),
            "verification complete"
        );
        Ok(findings)
    }

    /// Stage 1: every candidate re-probed in isolation, concurrently.
    async fn reprobe(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>, ProbeError> {
        let total = candidates.len();
        self.emitter
            .log(
                LogLevel::Info,
                format!("verifying {total} candidate fragments"),
            )
            .await;

        let checks = candidates.iter().map(|candidate| async {
            // Bare probe: the candidate's own registry entry must not
            // mask it into a false SAFE.
            let outcome = self.probe.classify_bare(&candidate.text).await?;
            Ok::<bool, ProbeError>(outcome.is_blocked())
        });
        let verdicts = try_join_all(checks).await?;

        let survivors: Vec<Candidate> = candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(candidate, blocked)| {
                if !blocked {
                    debug!(
                        text = candidate.text.as_str(),
                        "candidate accepted bare, dropped as artifact"
                    );
                }
                blocked.then_some(candidate)
            })
            .collect();

        if survivors.len() < total {
            self.emitter
                .log(
                    LogLevel::Info,
                    format!(
                        "{} of {total} candidates dropped as context artifacts",
                        total - survivors.len()
                    ),
                )
                .await;
        }
        Ok(survivors)
    }
}

/// Stage 2: keep a keyword only if no shorter confirmed keyword is a
/// substring of it. Processing in `(length, lexicographic)` order makes
/// the reduction a single pass that is already at fixed point: every
/// potential container sees all of its shorter triggers first.
fn reduce_containment(survivors: &[Candidate]) -> BTreeMap<String, Evidence> {
    let mut by_text: BTreeMap<String, Evidence> = BTreeMap::new();
    for candidate in survivors {
        by_text
            .entry(candidate.text.clone())
            .or_insert_with(|| candidate.evidence.clone());
    }

    let mut ordered: Vec<&String> = by_text.keys().collect();
    ordered.sort_by(|a, b| {
        a.chars()
            .count()
            .cmp(&b.chars().count())
            .then_with(|| a.cmp(b))
    });

    let mut retained: Vec<&String> = Vec::new();
    for text in ordered {
        if retained.iter().any(|kept| text.contains(kept.as_str())) {
            debug!(text = text.as_str(), "dropped, contains a confirmed shorter trigger");
            continue;
        }
        retained.push(text);
    }

    let retained: Vec<String> = retained.into_iter().cloned().collect();
    by_text.retain(|text, _| retained.iter().any(|kept| kept == text));
    by_text
}

/// Stage 3: recount every retained keyword over the original input,
/// leftmost non-overlapping. Findings come out sorted by first
/// occurrence, equal-length overlaps resolved leftmost-first.
fn recount(retained: &BTreeMap<String, Evidence>, original: &[char]) -> Vec<Finding> {
    let mut findings: Vec<Finding> = Vec::new();
    for (keyword, evidence) in retained {
        let needle: Vec<char> = keyword.chars().collect();
        let locations = occurrences(original, &needle);
        if locations.is_empty() {
            // A candidate whose text never matches the input would
            // violate coordinate stability; drop rather than emit.
            debug!(keyword = keyword.as_str(), "no occurrence in input, dropped");
            continue;
        }
        findings.push(Finding {
            keyword: keyword.clone(),
            locations,
            evidence: evidence.clone(),
        });
    }

    findings.sort_by(|a, b| {
        let a_first = a.locations.first().copied().unwrap_or(Span::new(0, 0));
        let b_first = b.locations.first().copied().unwrap_or(Span::new(0, 0));
        a_first.cmp(&b_first).then_with(|| a.keyword.cmp(&b.keyword))
    });
    findings
}

fn occurrences(haystack: &[char], needle: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return spans;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            spans.push(Span::new(i, i + needle.len()));
            i += needle.len();
        } else {
            i += 1;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::{ProbeTransport, RawResponse};
    use crate::scanner::cancel::CancellationToken;
    use async_trait::async_trait;
    use gatesift_protocol::{EvidenceKind, RuleSet, ScanConfig};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Rejects texts containing a hidden keyword or exactly matching a
    /// composite phrase.
    struct KeywordOracle {
        keywords: Vec<&'static str>,
        composites: Vec<&'static str>,
    }

    #[async_trait]
    impl ProbeTransport for KeywordOracle {
        async fn submit(&self, text: &str) -> Result<RawResponse, ProbeError> {
            let rejected = self.keywords.iter().any(|k| text.contains(k))
                || self.composites.iter().any(|c| *c == text);
            Ok(if rejected {
                RawResponse {
                    status: 400,
                    body: "content risk".into(),
                }
            } else {
                RawResponse {
                    status: 200,
                    body: "ok".into(),
                }
            })
        }
    }

    fn probe_over(oracle: KeywordOracle) -> (ProbeClient, mpsc::Receiver<gatesift_protocol::ScanEvent>) {
        let config = ScanConfig {
            jitter: 0.0,
            rules: RuleSet {
                block_status_codes: [400].into_iter().collect(),
                block_keywords: vec!["risk".into()],
                ..RuleSet::default()
            },
            ..ScanConfig::default()
        };
        let (tx, rx) = mpsc::channel(256);
        (
            ProbeClient::new(
                &config,
                Arc::new(oracle),
                EventEmitter::new(tx.clone()),
                CancellationToken::new(),
            ),
            rx,
        )
    }

    #[tokio::test]
    async fn hallucinated_long_phrases_are_dropped_in_stage_one() {
        let (probe, _rx) = probe_over(KeywordOracle {
            keywords: vec![],
            composites: vec![],
        });
        let (tx, _erx) = mpsc::channel(256);
        let emitter = EventEmitter::new(tx);
        let verifier = Verifier::new(&probe, &emitter);

        let original: Vec<char> = "long benign sentence containing X".chars().collect();
        let findings = verifier
            .run(
                vec![candidate("long benign sentence containing X", 0)],
                &original,
            )
            .await
            .unwrap();
        assert!(findings.is_empty(), "artifact must not survive verification");
    }

    #[tokio::test]
    async fn composite_phrase_reduces_to_its_core_trigger() {
        let (probe, _rx) = probe_over(KeywordOracle {
            keywords: vec!["cat"],
            composites: vec!["black cat"],
        });
        let (tx, _erx) = mpsc::channel(256);
        let emitter = EventEmitter::new(tx);
        let verifier = Verifier::new(&probe, &emitter);

        let original: Vec<char> = "the black cat sat with a cat".chars().collect();
        let findings = verifier
            .run(
                vec![candidate("black cat", 4), candidate("cat", 25)],
                &original,
            )
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].keyword, "cat");
        assert_eq!(
            findings[0].locations,
            vec![Span::new(10, 13), Span::new(25, 28)]
        );
    }

    fn candidate(text: &str, start: usize) -> Candidate {
        Candidate {
            text: text.to_string(),
            start,
            end: start + text.chars().count(),
            evidence: Evidence::status_code(400),
        }
    }

    #[test]
    fn containment_prefers_the_shorter_trigger() {
        let survivors = vec![candidate("black cat", 2), candidate("cat", 8)];
        let retained = reduce_containment(&survivors);
        assert_eq!(retained.len(), 1);
        assert!(retained.contains_key("cat"));
    }

    #[test]
    fn containment_is_transitive() {
        let survivors = vec![
            candidate("a big black cat", 0),
            candidate("black cat", 6),
            candidate("cat", 12),
        ];
        let retained = reduce_containment(&survivors);
        assert_eq!(retained.keys().collect::<Vec<_>>(), vec!["cat"]);
    }

    #[test]
    fn unrelated_keywords_all_survive() {
        let survivors = vec![candidate("cat", 0), candidate("dog", 10)];
        let retained = reduce_containment(&survivors);
        assert_eq!(retained.len(), 2);
    }

    #[test]
    fn equal_length_tie_breaks_lexicographically() {
        // Neither contains the other; both survive, ordering is stable.
        let survivors = vec![candidate("bb", 4), candidate("aa", 9)];
        let retained = reduce_containment(&survivors);
        assert_eq!(
            retained.keys().collect::<Vec<_>>(),
            vec!["aa", "bb"]
        );
    }

    #[test]
    fn recount_finds_all_nonoverlapping_occurrences() {
        let original: Vec<char> = "ab cd ab".chars().collect();
        let mut retained = BTreeMap::new();
        retained.insert("ab".to_string(), Evidence::status_code(400));
        let findings = recount(&retained, &original);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].locations,
            vec![Span::new(0, 2), Span::new(6, 8)]
        );
        assert_eq!(findings[0].evidence.kind, EvidenceKind::StatusCode);
    }

    #[test]
    fn recount_advances_past_each_match() {
        let original: Vec<char> = "abab".chars().collect();
        let mut retained = BTreeMap::new();
        retained.insert("ab".to_string(), Evidence::status_code(400));
        let findings = recount(&retained, &original);
        assert_eq!(
            findings[0].locations,
            vec![Span::new(0, 2), Span::new(2, 4)]
        );
    }

    #[test]
    fn recount_drops_keywords_absent_from_input() {
        let original: Vec<char> = "nothing here".chars().collect();
        let mut retained = BTreeMap::new();
        retained.insert("ghost".to_string(), Evidence::status_code(400));
        assert!(recount(&retained, &original).is_empty());
    }

    #[test]
    fn findings_are_sorted_by_first_occurrence() {
        let original: Vec<char> = "dog then cat".chars().collect();
        let mut retained = BTreeMap::new();
        retained.insert("cat".to_string(), Evidence::status_code(400));
        retained.insert("dog".to_string(), Evidence::status_code(400));
        let findings = recount(&retained, &original);
        assert_eq!(findings[0].keyword, "dog");
        assert_eq!(findings[1].keyword, "cat");
    }
}
