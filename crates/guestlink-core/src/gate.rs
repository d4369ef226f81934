use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::capability::CapabilityRegistry;
use crate::context::FrameContext;
use crate::correlator::{Correlator, PendingReply};
use crate::error::BridgeError;
use crate::lifecycle::LifecycleTracker;
use crate::metrics::BridgeMetrics;

/// Static description of one feature-module operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub method: &'static str,
    pub contexts: &'static [FrameContext],
    pub capability: Option<&'static [&'static str]>,
}

/// The only entry point feature modules use to reach the host.
///
/// Every call runs the same checks in a fixed order, short-circuiting on the
/// first failure:
///
/// 1. lifecycle/context (`NotInitialized`, `WrongContext`)
/// 2. capability (`NotSupportedOnPlatform`)
/// 3. correlator send
///
/// Steps 1 and 2 never touch the channel and never consume a request id.
#[derive(Clone)]
pub struct CallGate {
    lifecycle: Arc<LifecycleTracker>,
    capabilities: Arc<CapabilityRegistry>,
    correlator: Arc<Correlator>,
    metrics: Arc<BridgeMetrics>,
    timeout: Option<Duration>,
}

impl CallGate {
    pub fn new(
        lifecycle: Arc<LifecycleTracker>,
        capabilities: Arc<CapabilityRegistry>,
        correlator: Arc<Correlator>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            lifecycle,
            capabilities,
            correlator,
            metrics,
            timeout: None,
        }
    }

    /// Give up on responses that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_supported(&self, path: &[&str]) -> bool {
        self.capabilities.supports(path)
    }

    pub fn current_context(&self) -> Result<FrameContext, BridgeError> {
        self.lifecycle.current_context()
    }

    /// Run the pre-send checks and return the context the request is issued in.
    pub fn check(
        &self,
        method: &str,
        contexts: &[FrameContext],
        capability: Option<&[&str]>,
    ) -> Result<FrameContext, BridgeError> {
        let context = match self.lifecycle.require_context(contexts) {
            Ok(context) => context,
            Err(e) => return Err(self.reject(method, e)),
        };

        if let Some(path) = capability
            && !self.capabilities.supports(path)
        {
            let e = BridgeError::NotSupportedOnPlatform {
                capability: path.join("."),
            };
            return Err(self.reject(method, e));
        }

        Ok(context)
    }

    fn reject(&self, method: &str, error: BridgeError) -> BridgeError {
        self.metrics.record_gate_rejection();
        tracing::debug!(method, error = %error, "Call rejected by gate");
        error
    }

    /// Check and send, returning the pending reply without waiting on it.
    pub async fn issue<P: Serialize + ?Sized>(
        &self,
        method: &str,
        payload: &P,
        contexts: &[FrameContext],
        capability: Option<&[&str]>,
    ) -> Result<PendingReply, BridgeError> {
        let context = self.check(method, contexts, capability)?;
        self.issue_checked(context, method, payload).await
    }

    /// Send in a `context` already returned by [`check`](Self::check),
    /// without repeating the checks. For operations that validate their
    /// arguments between the gate and the send.
    pub async fn issue_checked<P: Serialize + ?Sized>(
        &self,
        context: FrameContext,
        method: &str,
        payload: &P,
    ) -> Result<PendingReply, BridgeError> {
        self.correlator.issue(method, payload, context).await
    }

    /// Check, send, wait for the host and decode its result.
    pub async fn invoke<P, R>(
        &self,
        method: &str,
        payload: &P,
        contexts: &[FrameContext],
        capability: Option<&[&str]>,
    ) -> Result<R, BridgeError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let reply = self.issue(method, payload, contexts, capability).await?;
        let value = self.wait(reply).await?;
        serde_json::from_value(value).map_err(|source| BridgeError::InvalidResponse {
            method: method.to_string(),
            source,
        })
    }

    /// `invoke` driven by an [`Operation`] declaration.
    pub async fn invoke_operation<P, R>(&self, op: &Operation, payload: &P) -> Result<R, BridgeError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(op.method, payload, op.contexts, op.capability)
            .await
    }

    /// Wait for a reply, honouring the configured timeout.
    pub async fn wait(&self, reply: PendingReply) -> Result<serde_json::Value, BridgeError> {
        let Some(limit) = self.timeout else {
            return reply.await;
        };

        let id = reply.id();
        let method = reply.method().to_string();
        match tokio::time::timeout(limit, reply).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.correlator.forget(id).await;
                self.metrics.record_timeout();
                tracing::warn!(id = %id, method = %method, after = ?limit, "Request timed out");
                Err(BridgeError::TimedOut {
                    method,
                    after: limit,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RequestEnvelope, RequestId, ResponseEnvelope};
    use tokio::sync::mpsc;

    const X: &[&str] = &["x"];

    struct Fixture {
        gate: CallGate,
        lifecycle: Arc<LifecycleTracker>,
        capabilities: Arc<CapabilityRegistry>,
        correlator: Arc<Correlator>,
        metrics: Arc<BridgeMetrics>,
        host: mpsc::Receiver<RequestEnvelope>,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::channel(8);
        let metrics = Arc::new(BridgeMetrics::new());
        let lifecycle = Arc::new(LifecycleTracker::new());
        let capabilities = Arc::new(CapabilityRegistry::new());
        let correlator = Arc::new(Correlator::new(Arc::new(tx), metrics.clone()));
        Fixture {
            gate: CallGate::new(
                lifecycle.clone(),
                capabilities.clone(),
                correlator.clone(),
                metrics.clone(),
            ),
            lifecycle,
            capabilities,
            correlator,
            metrics,
            host: rx,
        }
    }

    async fn ready(f: &mut Fixture, context: &str, capabilities: serde_json::Value) {
        let lifecycle = f.lifecycle.clone();
        let correlator = f.correlator.clone();
        let registry = f.capabilities.clone();
        let task =
            tokio::spawn(async move { lifecycle.initialize(correlator, registry, None).await });
        f.host.recv().await.unwrap();
        f.correlator
            .resolve(ResponseEnvelope::success(
                RequestId::HANDSHAKE,
                serde_json::json!({"context": context, "capabilities": capabilities}),
            ))
            .await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn not_initialized_wins_over_everything() {
        let f = fixture();
        let result = f
            .gate
            .invoke::<_, serde_json::Value>("x.read", &(), &[FrameContext::Task], Some(X))
            .await;
        assert!(matches!(result, Err(BridgeError::NotInitialized)));
        assert_eq!(f.metrics.snapshot().gate_rejections, 1);
    }

    #[tokio::test]
    async fn wrong_context_is_checked_before_capability() {
        let mut f = fixture();
        ready(&mut f, "settings", serde_json::json!({})).await;

        let result = f
            .gate
            .invoke::<_, serde_json::Value>("x.read", &(), &[FrameContext::Task], Some(X))
            .await;
        assert!(matches!(result, Err(BridgeError::WrongContext { .. })));
        assert!(f.host.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_capability_is_not_supported() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({"y": true})).await;

        let result = f
            .gate
            .invoke::<_, serde_json::Value>("x.read", &(), &[FrameContext::Task], Some(X))
            .await;
        match result {
            Err(BridgeError::NotSupportedOnPlatform { capability }) => assert_eq!(capability, "x"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(f.host.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_calls_do_not_consume_ids() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({"x": true})).await;

        let _ = f
            .gate
            .issue("x.read", &(), &[FrameContext::Settings], None)
            .await;
        let reply = f
            .gate
            .issue("x.read", &(), &[FrameContext::Task], Some(X))
            .await
            .unwrap();
        assert_eq!(reply.id(), RequestId(1));
    }

    #[tokio::test]
    async fn typed_results_are_decoded() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({"x": true})).await;

        let gate = f.gate.clone();
        let call = tokio::spawn(async move {
            gate.invoke::<_, bool>("x.read", &(), &[FrameContext::Task], Some(X))
                .await
        });
        let sent = f.host.recv().await.unwrap();
        f.correlator
            .resolve(ResponseEnvelope::success(sent.id, serde_json::json!(true)))
            .await;

        assert!(call.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn mismatched_result_is_invalid_response() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({})).await;

        let gate = f.gate.clone();
        let call = tokio::spawn(async move {
            gate.invoke::<_, bool>("x.read", &(), &[], None).await
        });
        let sent = f.host.recv().await.unwrap();
        f.correlator
            .resolve(ResponseEnvelope::success(sent.id, serde_json::json!("nope")))
            .await;

        assert!(matches!(
            call.await.unwrap(),
            Err(BridgeError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn operation_declarations_drive_invoke() {
        const READ: Operation = Operation {
            method: "x.read",
            contexts: &[FrameContext::Content],
            capability: Some(X),
        };

        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({"x": true})).await;

        let result = f
            .gate
            .invoke_operation::<_, serde_json::Value>(&READ, &())
            .await;
        assert!(matches!(result, Err(BridgeError::WrongContext { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_forgets_pending_entry() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({})).await;
        let gate = f.gate.clone().with_timeout(Some(Duration::from_secs(5)));

        let result = gate
            .invoke::<_, serde_json::Value>("x.slow", &(), &[], None)
            .await;

        match result {
            Err(BridgeError::TimedOut { method, after }) => {
                assert_eq!(method, "x.slow");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(f.correlator.pending_count().await, 0);
        assert_eq!(f.metrics.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn issue_checked_sends_in_the_checked_context() {
        let mut f = fixture();
        ready(&mut f, "task", serde_json::json!({"x": true})).await;

        let context = f
            .gate
            .check("x.write", &[FrameContext::Task], Some(X))
            .unwrap();
        let reply = f.gate.issue_checked(context, "x.write", &1).await.unwrap();

        let sent = f.host.recv().await.unwrap();
        assert_eq!(sent.id, reply.id());
        assert_eq!(sent.method, "x.write");
        assert_eq!(f.metrics.snapshot().requests_issued, 1);
        assert_eq!(f.metrics.snapshot().gate_rejections, 0);
    }
}
