//! Shared test doubles for queue and façade integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use desec_desk_client::{ApiError, ApiOutcome, ApiRequest, RateLimit, Transport};

/// Deterministic [`Transport`] double.
///
/// Outcomes are scripted per `"METHOD path"` key and consumed in order;
/// unscripted requests get the configurable default. Every executed request
/// is recorded so tests can assert dispatch order and call counts.
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<ApiOutcome>>>,
    default_outcome: Mutex<ApiOutcome>,
    /// Executed requests, in dispatch order.
    pub calls: Mutex<Vec<ApiRequest>>,
    /// Arguments of every `adapt_rate_limit` call.
    pub adapted: Mutex<Vec<f64>>,
    /// Arguments of every `set_rate` call.
    pub rates: Mutex<Vec<f64>>,
}

pub fn key_of(request: &ApiRequest) -> String {
    format!("{} {}", request.method.as_str(), request.path)
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_outcome: Mutex::new(ApiOutcome::Success {
                status: 200,
                body: None,
            }),
            calls: Mutex::new(Vec::new()),
            adapted: Mutex::new(Vec::new()),
            rates: Mutex::new(Vec::new()),
        }
    }

    /// Queues one outcome for requests matching `key` (`"METHOD path"`).
    pub fn script(&self, key: &str, outcome: ApiOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queues several outcomes for `key`, consumed one per call.
    pub fn script_seq(&self, key: &str, outcomes: Vec<ApiOutcome>) {
        let mut scripts = self.scripts.lock().unwrap();
        let entry = scripts.entry(key.to_string()).or_default();
        entry.extend(outcomes);
    }

    pub fn set_default(&self, outcome: ApiOutcome) {
        *self.default_outcome.lock().unwrap() = outcome;
    }

    /// Paths of all executed requests, in order.
    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(key_of).collect()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| key_of(r) == key)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &ApiRequest) -> ApiOutcome {
        self.calls.lock().unwrap().push(request.clone());
        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&key_of(request)).and_then(VecDeque::pop_front)
        };
        scripted.unwrap_or_else(|| self.default_outcome.lock().unwrap().clone())
    }

    async fn adapt_rate_limit(&self, retry_after: f64) {
        self.adapted.lock().unwrap().push(retry_after);
    }

    async fn set_rate(&self, rate: f64) {
        self.rates.lock().unwrap().push(rate);
    }
}

/// Shorthand constructors for scripted outcomes.
pub fn ok(body: serde_json::Value) -> ApiOutcome {
    ApiOutcome::Success {
        status: 200,
        body: Some(body),
    }
}

pub fn ok_empty() -> ApiOutcome {
    ApiOutcome::Success {
        status: 204,
        body: None,
    }
}

pub fn rate_limited(retry_after: f64) -> ApiOutcome {
    ApiOutcome::RateLimited(RateLimit {
        retry_after,
        message: "Request was throttled.".to_string(),
        raw: None,
    })
}

pub fn failed(error: ApiError) -> ApiOutcome {
    ApiOutcome::Failed(error)
}
