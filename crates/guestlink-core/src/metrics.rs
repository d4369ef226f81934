use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward counters to an
/// external collector or simply log them.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
}

/// In-memory bridge counters.
#[derive(Default)]
pub struct BridgeMetrics {
    pub requests_issued: AtomicU64,
    pub responses_matched: AtomicU64,
    pub host_errors: AtomicU64,
    pub stray_responses: AtomicU64,
    pub closure_rejections: AtomicU64,
    pub gate_rejections: AtomicU64,
    pub timeouts: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str, by: u64) {
        let val = counter.fetch_add(by, Ordering::Relaxed) + by;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_issued(&self) {
        self.bump(&self.requests_issued, "guestlink.bridge.requests_issued", 1);
    }

    pub fn record_matched(&self, host_error: bool) {
        self.bump(&self.responses_matched, "guestlink.bridge.responses_matched", 1);
        if host_error {
            self.bump(&self.host_errors, "guestlink.bridge.host_errors", 1);
        }
    }

    pub fn record_stray(&self) {
        self.bump(&self.stray_responses, "guestlink.bridge.stray_responses", 1);
    }

    pub fn record_closure_rejections(&self, count: u64) {
        if count > 0 {
            self.bump(
                &self.closure_rejections,
                "guestlink.bridge.closure_rejections",
                count,
            );
        }
    }

    pub fn record_gate_rejection(&self) {
        self.bump(&self.gate_rejections, "guestlink.bridge.gate_rejections", 1);
    }

    pub fn record_timeout(&self) {
        self.bump(&self.timeouts, "guestlink.bridge.timeouts", 1);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            host_errors: self.host_errors.load(Ordering::Relaxed),
            stray_responses: self.stray_responses.load(Ordering::Relaxed),
            closure_rejections: self.closure_rejections.load(Ordering::Relaxed),
            gate_rejections: self.gate_rejections.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub requests_issued: u64,
    pub responses_matched: u64,
    pub host_errors: u64,
    pub stray_responses: u64,
    pub closure_rejections: u64,
    pub gate_rejections: u64,
    pub timeouts: u64,
}

/// Emits every counter update as a structured log event.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value = value, kind = "counter", "metric");
    }
}
