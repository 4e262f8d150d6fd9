//! The probe client: bounded-concurrency classification with lazy
//! masking and retry.
//!
//! Every suspension point in the engine lives here: the semaphore
//! acquire, the network call, and backoff sleeps. Masking is applied
//! after the permit is acquired and before the wire, so a probe always
//! benefits from every keyword discovered while it was queued.

use gatesift_protocol::{Outcome, ProbeError, ScanConfig, ScanStats};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::engine::mask::MaskRegistry;
use crate::engine::rules::RuleEvaluator;
use crate::engine::transport::ProbeTransport;
use crate::scanner::cancel::CancellationToken;
use crate::scanner::emitter::EventEmitter;

/// First retry delay.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Retry delay ceiling (before jitter).
const BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Response-body prefix attached to unknown-status events.
const SNIPPET_LEN: usize = 200;

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    blocked: AtomicU64,
    safe: AtomicU64,
    errors: AtomicU64,
}

/// Issues classify calls against the upstream gateway.
///
/// One instance serves one scan: the mask registry, statistics, and
/// unknown-code tracking are all scoped to it.
pub struct ProbeClient {
    transport: Arc<dyn ProbeTransport>,
    rules: RuleEvaluator,
    masks: MaskRegistry,
    semaphore: Semaphore,
    emitter: EventEmitter,
    cancel: CancellationToken,
    max_retries: u32,
    jitter: f64,
    counters: Counters,
    unknown_counts: Mutex<BTreeMap<u16, u64>>,
    reported_unknown: Mutex<BTreeSet<u16>>,
}

impl ProbeClient {
    pub fn new(
        config: &ScanConfig,
        transport: Arc<dyn ProbeTransport>,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            rules: RuleEvaluator::new(config.rules.clone()),
            masks: MaskRegistry::new(),
            semaphore: Semaphore::new(config.concurrency),
            emitter,
            cancel,
            max_retries: config.max_retries.max(1),
            jitter: config.jitter,
            counters: Counters::default(),
            unknown_counts: Mutex::new(BTreeMap::new()),
            reported_unknown: Mutex::new(BTreeSet::new()),
        }
    }

    /// The scan-scoped registry of confirmed sensitive words.
    pub fn masks(&self) -> &MaskRegistry {
        &self.masks
    }

    /// Classify a text with known keywords masked out.
    pub async fn classify(&self, text: &str) -> Result<Outcome, ProbeError> {
        self.classify_inner(text, false).await
    }

    /// Classify a text exactly as given, skipping the mask registry.
    /// Used by verification so a confirmed keyword's own registry entry
    /// does not nullify its re-probe.
    pub async fn classify_bare(&self, text: &str) -> Result<Outcome, ProbeError> {
        self.classify_inner(text, true).await
    }

    async fn classify_inner(&self, text: &str, bypass_mask: bool) -> Result<Outcome, ProbeError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProbeError::Transport("probe semaphore closed".into()))?;

        // Scan-phase probes stop at the permit boundary once cancelled.
        // Bare verification probes are exempt: verification already in
        // progress runs to completion.
        if !bypass_mask && self.cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let probe_text = if bypass_mask {
            text.to_string()
        } else {
            self.masks.apply(text)
        };

        // Nothing unmasked left to trigger on: settle without the wire.
        if MaskRegistry::is_fully_masked(&probe_text) {
            self.counters.safe.fetch_add(1, Ordering::Relaxed);
            debug!(len = probe_text.chars().count(), "fully masked, skipping probe");
            return Ok(Outcome::Safe);
        }

        let mut backoff = BACKOFF_BASE;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.counters.requests.fetch_add(1, Ordering::Relaxed);

            let submitted = match self.transport.submit(&probe_text).await {
                Ok(raw) => Ok(raw),
                Err(e @ ProbeError::RequestBuild(_)) => {
                    // A request that cannot be built will not build on
                    // the next attempt either.
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => Err(e),
            };

            let retry_reason = match submitted {
                Ok(raw) => {
                    let outcome = self.rules.evaluate(raw.status, &raw.body);
                    match outcome {
                        Outcome::Retry { status_code } => {
                            format!("retryable status {status_code}")
                        }
                        Outcome::Blocked { .. } => {
                            self.counters.blocked.fetch_add(1, Ordering::Relaxed);
                            return Ok(outcome);
                        }
                        Outcome::Safe => {
                            self.counters.safe.fetch_add(1, Ordering::Relaxed);
                            return Ok(outcome);
                        }
                        Outcome::Unknown { status_code } => {
                            self.record_unknown(status_code, &raw.body).await;
                            return Ok(outcome);
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return Err(ProbeError::RetriesExhausted {
                    attempts: attempt,
                    last_error: retry_reason,
                });
            }

            let delay = self.jittered(backoff);
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = retry_reason.as_str(),
                "probe attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }

    async fn record_unknown(&self, status_code: u16, body: &str) {
        let first = {
            let mut counts = self.unknown_counts.lock().unwrap_or_else(|e| e.into_inner());
            *counts.entry(status_code).or_insert(0) += 1;

            let mut reported = self
                .reported_unknown
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            reported.insert(status_code)
        };

        if first {
            let snippet: String = body.chars().take(SNIPPET_LEN).collect();
            warn!(status_code, "unrecognized status code, treating as safe");
            self.emitter.unknown_status_code(status_code, snippet).await;
        }
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            request_count: self.counters.requests.load(Ordering::Relaxed),
            blocked_count: self.counters.blocked.load(Ordering::Relaxed),
            safe_count: self.counters.safe.load(Ordering::Relaxed),
            error_count: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    pub fn unknown_status_code_counts(&self) -> BTreeMap<u16, u64> {
        self.unknown_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::RawResponse;
    use async_trait::async_trait;
    use gatesift_protocol::{RuleSet, ScanEvent};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Scriptable transport: pops a queued response per submission and
    /// records every text it was handed.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<RawResponse>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<RawResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn submit(&self, text: &str) -> Result<RawResponse, ProbeError> {
            self.seen.lock().unwrap().push(text.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProbeError::Transport("no scripted response left".into()))
        }
    }

    fn ok() -> RawResponse {
        RawResponse {
            status: 200,
            body: r#"{"choices": [{"finish_reason": "stop"}]}"#.into(),
        }
    }

    fn blocked() -> RawResponse {
        RawResponse {
            status: 400,
            body: r#"{"error": {"message": "content risk detected"}}"#.into(),
        }
    }

    fn test_config() -> ScanConfig {
        ScanConfig {
            jitter: 0.0,
            rules: RuleSet {
                block_status_codes: [400].into_iter().collect(),
                block_keywords: vec!["risk".into()],
                retry_status_codes: [429].into_iter().collect(),
            },
            ..ScanConfig::default()
        }
    }

    fn client(
        config: &ScanConfig,
        transport: Arc<ScriptedTransport>,
    ) -> (ProbeClient, mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            ProbeClient::new(
                config,
                transport,
                EventEmitter::new(tx),
                CancellationToken::new(),
            ),
            rx,
        )
    }

    #[tokio::test]
    async fn masks_are_applied_before_the_wire() {
        let transport = ScriptedTransport::new(vec![ok()]);
        let (probe, _rx) = client(&test_config(), transport.clone());
        probe.masks().add("foo");

        let outcome = probe.classify("say foo now").await.unwrap();
        assert_eq!(outcome, Outcome::Safe);
        assert_eq!(transport.seen(), vec!["say *** now".to_string()]);
    }

    #[tokio::test]
    async fn fully_masked_text_skips_the_network() {
        let transport = ScriptedTransport::new(vec![]);
        let (probe, _rx) = client(&test_config(), transport.clone());
        probe.masks().add("foo");

        assert_eq!(probe.classify("foo foo").await.unwrap(), Outcome::Safe);
        assert_eq!(probe.classify("").await.unwrap(), Outcome::Safe);
        assert!(transport.seen().is_empty());
        assert_eq!(probe.stats().request_count, 0);
    }

    #[tokio::test]
    async fn bare_classification_bypasses_the_registry() {
        let transport = ScriptedTransport::new(vec![blocked()]);
        let (probe, _rx) = client(&test_config(), transport.clone());
        probe.masks().add("foo");

        let outcome = probe.classify_bare("foo").await.unwrap();
        assert!(outcome.is_blocked());
        assert_eq!(transport.seen(), vec!["foo".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_retry_statuses() {
        let retry = RawResponse {
            status: 429,
            body: "slow down".into(),
        };
        let transport = ScriptedTransport::new(vec![retry.clone(), retry, blocked()]);
        let (probe, _rx) = client(&test_config(), transport.clone());

        let outcome = probe.classify("bad words").await.unwrap();
        assert!(outcome.is_blocked());
        // Every attempt counts, including the two that were retried.
        assert_eq!(probe.stats().request_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_as_fatal() {
        let retry = RawResponse {
            status: 429,
            body: "slow down".into(),
        };
        let transport =
            ScriptedTransport::new(vec![retry.clone(), retry.clone(), retry.clone(), retry]);
        let (probe, _rx) = client(&test_config(), transport);

        let err = probe.classify("text").await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(probe.stats().error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried_too() {
        // First submission answers a retryable 500; the second hits the
        // empty queue and surfaces as a transport error.
        let transport = ScriptedTransport::new(vec![RawResponse {
            status: 500,
            body: String::new(),
        }]);
        let mut config = test_config();
        config.rules.retry_status_codes.insert(500);
        config.max_retries = 2;
        let (probe, _rx) = client(&config, transport);

        let err = probe.classify("text").await.unwrap_err();
        assert!(matches!(err, ProbeError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn unknown_status_is_counted_and_reported_once() {
        let teapot = RawResponse {
            status: 418,
            body: "short and stout".into(),
        };
        let transport = ScriptedTransport::new(vec![teapot.clone(), teapot]);
        let (probe, mut rx) = client(&test_config(), transport);

        let first = probe.classify("a").await.unwrap();
        let second = probe.classify("b").await.unwrap();
        assert_eq!(first, Outcome::Unknown { status_code: 418 });
        assert_eq!(second, Outcome::Unknown { status_code: 418 });
        assert_eq!(probe.unknown_status_code_counts().get(&418), Some(&2));

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event,
            ScanEvent::UnknownStatusCode {
                status_code: 418,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_scan_probes_stop_at_the_permit() {
        let transport = ScriptedTransport::new(vec![ok(), blocked()]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let probe = ProbeClient::new(
            &test_config(),
            transport.clone(),
            EventEmitter::new(tx),
            cancel.clone(),
        );
        cancel.cancel();

        let err = probe.classify("text").await.unwrap_err();
        assert_eq!(err, ProbeError::Cancelled);
        // Verification probes keep working after cancellation.
        let outcome = probe.classify_bare("text").await.unwrap();
        assert_eq!(outcome, Outcome::Safe);
        assert_eq!(transport.seen(), vec!["text".to_string()]);
    }

    #[test]
    fn jitter_keeps_delay_within_band() {
        let transport = ScriptedTransport::new(vec![]);
        let mut config = test_config();
        config.jitter = 0.5;
        let (tx, _rx) = mpsc::channel(8);
        let probe = ProbeClient::new(
            &config,
            transport,
            EventEmitter::new(tx),
            CancellationToken::new(),
        );

        for _ in 0..100 {
            let delay = probe.jittered(Duration::from_secs(2));
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(3));
        }
    }
}
