use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capability::CapabilityRegistry;
use crate::channel::Outbound;
use crate::config::BridgeSettings;
use crate::context::FrameContext;
use crate::correlator::Correlator;
use crate::envelope::{HostEvent, HostMessage};
use crate::error::BridgeError;
use crate::gate::CallGate;
use crate::lifecycle::{LifecycleState, LifecycleTracker};
use crate::metrics::BridgeMetrics;

/// One guest's connection to its host.
///
/// Owns the lifecycle tracker, capability registry and correlator, routes
/// inbound host messages to them, and hands out [`CallGate`]s to feature
/// modules. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bridge {
    lifecycle: Arc<LifecycleTracker>,
    capabilities: Arc<CapabilityRegistry>,
    correlator: Arc<Correlator>,
    metrics: Arc<BridgeMetrics>,
    settings: Arc<BridgeSettings>,
}

impl Bridge {
    pub fn new(outbound: Arc<dyn Outbound>, settings: BridgeSettings) -> Self {
        Self::with_metrics(outbound, settings, Arc::new(BridgeMetrics::new()))
    }

    pub fn with_metrics(
        outbound: Arc<dyn Outbound>,
        settings: BridgeSettings,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(LifecycleTracker::new()),
            capabilities: Arc::new(CapabilityRegistry::new()),
            correlator: Arc::new(Correlator::new(outbound, metrics.clone())),
            metrics,
            settings: Arc::new(settings),
        }
    }

    /// Handshake with the host using the configured allowed contexts.
    pub async fn initialize(&self) -> Result<FrameContext, BridgeError> {
        let allowed = self.settings.allowed_contexts.as_deref();
        self.initialize_with(allowed).await
    }

    /// Handshake with the host, rejecting any context outside `allowed`.
    pub async fn initialize_with(
        &self,
        allowed: Option<&[FrameContext]>,
    ) -> Result<FrameContext, BridgeError> {
        self.lifecycle
            .initialize(
                self.correlator.clone(),
                self.capabilities.clone(),
                allowed.map(<[FrameContext]>::to_vec),
            )
            .await
    }

    /// A gate for feature modules, carrying the configured timeout.
    pub fn gate(&self) -> CallGate {
        CallGate::new(
            self.lifecycle.clone(),
            self.capabilities.clone(),
            self.correlator.clone(),
            self.metrics.clone(),
        )
        .with_timeout(self.settings.request_timeout())
    }

    /// Route one inbound message.
    pub async fn dispatch(&self, message: HostMessage) {
        match message {
            HostMessage::Response(response) => self.correlator.resolve(response).await,
            HostMessage::Event(HostEvent::ContextChanged { context }) => {
                self.lifecycle.change_context(context);
            }
        }
    }

    /// The transport reported closure: fail everything outstanding.
    pub async fn channel_closed(&self) -> usize {
        self.correlator.close().await
    }

    /// Drive dispatch from an inbound stream until it ends, then treat the
    /// end of the stream as channel closure.
    pub fn spawn_inbound(&self, mut inbound: mpsc::Receiver<HostMessage>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                bridge.dispatch(message).await;
            }
            bridge.channel_closed().await;
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }
}
