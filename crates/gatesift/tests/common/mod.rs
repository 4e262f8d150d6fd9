//! Deterministic mock gateway shared by the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use gatesift::engine::{ProbeTransport, RawResponse};
use gatesift_protocol::{ProbeError, RuleSet, ScanConfig, ScanEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Rejects a text iff it contains any hidden keyword or equals one of
/// the composite phrases. Status codes can be scripted per submission
/// to simulate rate limits and unknown responses.
pub struct MockGateway {
    keywords: Vec<String>,
    composites: Vec<String>,
    scripted: Mutex<VecDeque<u16>>,
    submissions: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl MockGateway {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            composites: Vec::new(),
            scripted: Mutex::new(VecDeque::new()),
            submissions: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Also reject these exact texts, composite-style.
    pub fn with_composites(mut self, composites: &[&str]) -> Self {
        self.composites = composites.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Force the next submissions to these status codes, in order.
    pub fn script_statuses(&self, statuses: &[u16]) {
        let mut scripted = self.scripted.lock().unwrap();
        scripted.extend(statuses.iter().copied());
    }

    /// Simulate network latency per submission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, text: &str) -> RawResponse {
        if let Some(status) = self.scripted.lock().unwrap().pop_front() {
            return RawResponse {
                status,
                body: format!(r#"{{"error": {{"message": "scripted status {status}"}}}}"#),
            };
        }

        let rejected = self.keywords.iter().any(|k| text.contains(k.as_str()))
            || self.composites.iter().any(|c| c == text);
        if rejected {
            RawResponse {
                status: 400,
                body: r#"{"error": {"message": "content risk detected by gateway"}}"#.into(),
            }
        } else {
            RawResponse {
                status: 200,
                body: r#"{"choices": [{"finish_reason": "stop", "message": {"content": "ok"}}]}"#
                    .into(),
            }
        }
    }
}

#[async_trait]
impl ProbeTransport for MockGateway {
    async fn submit(&self, text: &str) -> Result<RawResponse, ProbeError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self.respond(text);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

/// Config matched to the mock gateway's reject shape.
pub fn mock_config() -> ScanConfig {
    ScanConfig {
        jitter: 0.0,
        rules: RuleSet {
            block_status_codes: [400].into_iter().collect(),
            block_keywords: vec!["risk".into()],
            retry_status_codes: [429, 502, 503, 504].into_iter().collect(),
        },
        ..ScanConfig::default()
    }
}

/// An event channel wide enough that nothing is dropped in tests.
pub fn event_channel() -> (mpsc::Sender<ScanEvent>, mpsc::Receiver<ScanEvent>) {
    mpsc::channel(4096)
}

/// Drain all buffered events after the scan has finished.
pub fn drain(rx: &mut mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
