use std::sync::Arc;

use tokio::sync::watch;

use crate::capability::CapabilityRegistry;
use crate::context::FrameContext;
use crate::correlator::Correlator;
use crate::envelope::{HandshakePayload, HandshakeRequest};
use crate::error::BridgeError;

/// Protocol version the guest announces during the handshake.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready(FrameContext),
    /// Terminal: the handshake failed and the bridge stays unusable.
    Failed,
}

/// Tracks the guest's handshake with the host and the context the host has
/// placed it in.
///
/// ```text
/// Uninitialized --initialize--> Initializing --host ack--> Ready(ctx)
///                                    |                       |
///                                    +--failure--> Failed    +--context change--> Ready(ctx')
/// ```
///
/// The context is only ever taken from the host; the guest never reports it.
pub struct LifecycleTracker {
    state: watch::Sender<LifecycleState>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(LifecycleState::Uninitialized),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run the handshake once.
    ///
    /// A second call while `Ready` returns the current context without
    /// touching the host or the registry. A call while another handshake is in
    /// flight waits for that one. A call after a failed handshake reports
    /// `NotInitialized`.
    ///
    /// The exchange runs on its own task, so dropping the returned future
    /// does not strand the tracker in `Initializing`.
    pub async fn initialize(
        self: &Arc<Self>,
        correlator: Arc<Correlator>,
        registry: Arc<CapabilityRegistry>,
        allowed_contexts: Option<Vec<FrameContext>>,
    ) -> Result<FrameContext, BridgeError> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Uninitialized {
                *state = LifecycleState::Initializing;
                claimed = true;
                true
            } else {
                false
            }
        });

        if !claimed {
            return self.await_settled().await;
        }

        tracing::info!("Starting handshake with host");

        let tracker = Arc::clone(self);
        let exchange = tokio::spawn(async move {
            let outcome =
                Self::handshake(&correlator, &registry, allowed_contexts.as_deref()).await;
            tracker.settle(&outcome);
            outcome
        });

        match exchange.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let outcome = Err(BridgeError::HandshakeFailed(format!(
                    "handshake task aborted: {e}"
                )));
                self.settle(&outcome);
                outcome
            }
        }
    }

    fn settle(&self, outcome: &Result<FrameContext, BridgeError>) {
        match outcome {
            Ok(context) => {
                self.state.send_replace(LifecycleState::Ready(*context));
                tracing::info!(context = %context, "Handshake complete");
            }
            Err(e) => {
                self.state.send_replace(LifecycleState::Failed);
                tracing::error!(error = %e, "Handshake failed");
            }
        }
    }

    async fn await_settled(&self) -> Result<FrameContext, BridgeError> {
        let mut receiver = self.state.subscribe();
        let settled = *receiver
            .wait_for(|state| *state != LifecycleState::Initializing)
            .await
            .map_err(|_| BridgeError::NotInitialized)?;

        match settled {
            LifecycleState::Ready(context) => {
                tracing::debug!(context = %context, "Already initialized");
                Ok(context)
            }
            _ => Err(BridgeError::NotInitialized),
        }
    }

    async fn handshake(
        correlator: &Correlator,
        registry: &CapabilityRegistry,
        allowed_contexts: Option<&[FrameContext]>,
    ) -> Result<FrameContext, BridgeError> {
        let request = HandshakeRequest {
            version: SDK_VERSION.to_string(),
            allowed_contexts: allowed_contexts.map(<[FrameContext]>::to_vec),
        };

        let reply = correlator.handshake(&request).await?;
        let payload: HandshakePayload = serde_json::from_value(reply)
            .map_err(|e| BridgeError::HandshakeFailed(format!("malformed handshake payload: {e}")))?;

        if let Some(allowed) = allowed_contexts
            && !allowed.is_empty()
            && !allowed.contains(&payload.context)
        {
            return Err(BridgeError::HandshakeFailed(format!(
                "host placed guest in context {} which is not allowed",
                payload.context
            )));
        }

        registry.negotiate(payload.capabilities);
        Ok(payload.context)
    }

    pub fn current_context(&self) -> Result<FrameContext, BridgeError> {
        match self.state() {
            LifecycleState::Ready(context) => Ok(context),
            _ => Err(BridgeError::NotInitialized),
        }
    }

    /// Check that the guest is ready and in one of `allowed`. An empty set
    /// accepts any context.
    pub fn require_context(&self, allowed: &[FrameContext]) -> Result<FrameContext, BridgeError> {
        let current = self.current_context()?;
        if allowed.is_empty() || allowed.contains(&current) {
            Ok(current)
        } else {
            Err(BridgeError::WrongContext {
                current,
                allowed: allowed.to_vec(),
            })
        }
    }

    /// Apply a host-reported context change. Ignored unless `Ready`.
    pub fn change_context(&self, context: FrameContext) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|state| match state {
            LifecycleState::Ready(current) if *current != context => {
                previous = Some(*current);
                *state = LifecycleState::Ready(context);
                true
            }
            _ => false,
        });

        if changed {
            tracing::info!(from = ?previous, to = %context, "Host changed frame context");
        } else if !matches!(self.state(), LifecycleState::Ready(_)) {
            tracing::warn!(context = %context, state = ?self.state(), "Context change ignored before ready");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RequestEnvelope, RequestId, ResponseEnvelope};
    use crate::metrics::BridgeMetrics;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        tracker: Arc<LifecycleTracker>,
        correlator: Arc<Correlator>,
        registry: Arc<CapabilityRegistry>,
        host: mpsc::Receiver<RequestEnvelope>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(8);
        Harness {
            tracker: Arc::new(LifecycleTracker::new()),
            correlator: Arc::new(Correlator::new(Arc::new(tx), Arc::new(BridgeMetrics::new()))),
            registry: Arc::new(CapabilityRegistry::new()),
            host: rx,
        }
    }

    impl Harness {
        fn start(
            &self,
            allowed: Option<Vec<FrameContext>>,
        ) -> tokio::task::JoinHandle<Result<FrameContext, BridgeError>> {
            let tracker = self.tracker.clone();
            let correlator = self.correlator.clone();
            let registry = self.registry.clone();
            tokio::spawn(async move { tracker.initialize(correlator, registry, allowed).await })
        }

        async fn ack(&mut self, payload: serde_json::Value) {
            let sent = self.host.recv().await.unwrap();
            assert_eq!(sent.id, RequestId::HANDSHAKE);
            self.correlator
                .resolve(ResponseEnvelope::success(RequestId::HANDSHAKE, payload))
                .await;
        }
    }

    #[tokio::test]
    async fn starts_uninitialized() {
        let tracker = LifecycleTracker::new();
        assert_eq!(tracker.state(), LifecycleState::Uninitialized);
        assert!(matches!(
            tracker.current_context(),
            Err(BridgeError::NotInitialized)
        ));
        assert!(matches!(
            tracker.require_context(&[]),
            Err(BridgeError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn handshake_reaches_ready() {
        let mut h = harness();
        let task = h.start(None);
        h.ack(serde_json::json!({"context": "task", "capabilities": {"x": true}}))
            .await;

        assert_eq!(task.await.unwrap().unwrap(), FrameContext::Task);
        assert_eq!(h.tracker.state(), LifecycleState::Ready(FrameContext::Task));
        assert!(h.registry.supports(&["x"]));
    }

    #[tokio::test]
    async fn malformed_handshake_fails_terminally() {
        let mut h = harness();
        let task = h.start(None);
        h.ack(serde_json::json!({"nope": 1})).await;

        assert!(matches!(
            task.await.unwrap(),
            Err(BridgeError::HandshakeFailed(_))
        ));
        assert_eq!(h.tracker.state(), LifecycleState::Failed);

        let again = h
            .tracker
            .initialize(h.correlator.clone(), h.registry.clone(), None)
            .await;
        assert!(matches!(again, Err(BridgeError::NotInitialized)));
    }

    #[tokio::test]
    async fn host_rejection_fails_handshake() {
        let mut h = harness();
        let task = h.start(None);
        h.host.recv().await.unwrap();
        h.correlator
            .resolve(ResponseEnvelope::failure(
                RequestId::HANDSHAKE,
                crate::error::ErrorCode::OLD_PLATFORM,
                "too old",
            ))
            .await;

        assert!(matches!(
            task.await.unwrap(),
            Err(BridgeError::HostError { .. })
        ));
        assert_eq!(h.tracker.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn disallowed_initial_context_fails() {
        let mut h = harness();
        let task = h.start(Some(vec![FrameContext::Content]));
        h.ack(serde_json::json!({"context": "settings", "capabilities": {"x": true}}))
            .await;

        assert!(matches!(
            task.await.unwrap(),
            Err(BridgeError::HandshakeFailed(_))
        ));
        assert!(!h.registry.is_negotiated());
    }

    #[tokio::test]
    async fn second_initialize_is_a_no_op() {
        let mut h = harness();
        let task = h.start(None);
        h.ack(serde_json::json!({"context": "content", "capabilities": {"x": true}}))
            .await;
        task.await.unwrap().unwrap();

        let again = h
            .tracker
            .initialize(h.correlator.clone(), h.registry.clone(), None)
            .await
            .unwrap();

        assert_eq!(again, FrameContext::Content);
        assert!(h.host.try_recv().is_err(), "no second handshake sent");
        assert!(h.registry.supports(&["x"]));
    }

    #[tokio::test]
    async fn concurrent_initialize_waits_for_first() {
        let mut h = harness();
        let first = h.start(None);
        // Let the first caller claim the handshake.
        let sent = h.host.recv().await.unwrap();
        assert_eq!(sent.id, RequestId::HANDSHAKE);
        let second = h.start(None);
        tokio::task::yield_now().await;

        h.correlator
            .resolve(ResponseEnvelope::success(
                RequestId::HANDSHAKE,
                serde_json::json!({"context": "stage"}),
            ))
            .await;

        assert_eq!(first.await.unwrap().unwrap(), FrameContext::Stage);
        assert_eq!(second.await.unwrap().unwrap(), FrameContext::Stage);
        assert!(h.host.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_initialize_still_completes() {
        let mut h = harness();
        let first = tokio::time::timeout(
            Duration::from_millis(50),
            h.tracker
                .initialize(h.correlator.clone(), h.registry.clone(), None),
        )
        .await;
        assert!(first.is_err(), "nobody answered yet");
        assert_eq!(h.tracker.state(), LifecycleState::Initializing);

        h.ack(serde_json::json!({"context": "content", "capabilities": {"x": true}}))
            .await;

        let again = h
            .tracker
            .initialize(h.correlator.clone(), h.registry.clone(), None)
            .await
            .unwrap();
        assert_eq!(again, FrameContext::Content);
        assert_eq!(h.tracker.state(), LifecycleState::Ready(FrameContext::Content));
        assert!(h.registry.supports(&["x"]));
        assert!(h.host.try_recv().is_err(), "handshake sent only once");
    }

    #[tokio::test]
    async fn require_context_checks_membership() {
        let mut h = harness();
        let task = h.start(None);
        h.ack(serde_json::json!({"context": "task"})).await;
        task.await.unwrap().unwrap();

        assert_eq!(
            h.tracker
                .require_context(&[FrameContext::Content, FrameContext::Task])
                .unwrap(),
            FrameContext::Task
        );
        assert_eq!(h.tracker.require_context(&[]).unwrap(), FrameContext::Task);
        match h.tracker.require_context(&[FrameContext::Settings]) {
            Err(BridgeError::WrongContext { current, allowed }) => {
                assert_eq!(current, FrameContext::Task);
                assert_eq!(allowed, vec![FrameContext::Settings]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn context_changes_only_apply_when_ready() {
        let tracker = LifecycleTracker::new();
        assert!(!tracker.change_context(FrameContext::Task));
        assert_eq!(tracker.state(), LifecycleState::Uninitialized);

        let mut h = harness();
        let task = h.start(None);
        h.ack(serde_json::json!({"context": "content"})).await;
        task.await.unwrap().unwrap();

        assert!(h.tracker.change_context(FrameContext::Settings));
        assert_eq!(h.tracker.current_context().unwrap(), FrameContext::Settings);
        assert!(!h.tracker.change_context(FrameContext::Settings));
    }
}
