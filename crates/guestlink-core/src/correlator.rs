use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::{Mutex, oneshot};

use crate::channel::Outbound;
use crate::context::FrameContext;
use crate::envelope::{RequestEnvelope, RequestId, ResponseEnvelope};
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;

type Responder = oneshot::Sender<Result<serde_json::Value, BridgeError>>;

/// Method name of the handshake exchange.
pub const HANDSHAKE_METHOD: &str = "initialize";

/// A request that has been written to the channel and awaits its response.
struct PendingRequest {
    method: String,
    issued_context: FrameContext,
    responder: Responder,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    pending: HashMap<RequestId, PendingRequest>,
    handshake: Option<Responder>,
    closed: bool,
}

/// Matches inbound responses to outbound requests by id.
///
/// The correlator does not look at lifecycle state; the call gate decides
/// whether a request may be issued at all.
pub struct Correlator {
    outbound: Arc<dyn Outbound>,
    metrics: Arc<BridgeMetrics>,
    /// Held across id allocation and the channel write so requests reach the
    /// channel in id order.
    send_order: Mutex<()>,
    table: Mutex<Table>,
}

impl Correlator {
    pub fn new(outbound: Arc<dyn Outbound>, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            outbound,
            metrics,
            send_order: Mutex::new(()),
            table: Mutex::new(Table {
                next_id: RequestId::FIRST.0,
                ..Table::default()
            }),
        }
    }

    /// Write a request to the channel and return the future of its response.
    pub async fn issue<P: Serialize + ?Sized>(
        &self,
        method: &str,
        payload: &P,
        context: FrameContext,
    ) -> Result<PendingReply, BridgeError> {
        let payload = serde_json::to_value(payload)?;
        let _order = self.send_order.lock().await;

        let (responder, receiver) = oneshot::channel();
        let id = {
            let mut table = self.table.lock().await;
            if table.closed {
                return Err(BridgeError::ChannelClosed);
            }
            let id = RequestId(table.next_id);
            table.next_id += 1;
            table.pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_context: context,
                    responder,
                },
            );
            id
        };

        let envelope = RequestEnvelope {
            id,
            method: method.to_string(),
            payload,
        };

        if let Err(e) = self.outbound.post(envelope).await {
            tracing::warn!(id = %id, method, error = %e, "Failed to write request to channel");
            self.table.lock().await.pending.remove(&id);
            return Err(BridgeError::ChannelClosed);
        }

        self.metrics.record_issued();
        tracing::debug!(id = %id, method, context = %context, "Request issued");

        Ok(PendingReply {
            id,
            method: method.to_string(),
            receiver,
        })
    }

    /// `issue` followed by waiting for the response.
    pub async fn send<P: Serialize + ?Sized>(
        &self,
        method: &str,
        payload: &P,
        context: FrameContext,
    ) -> Result<serde_json::Value, BridgeError> {
        self.issue(method, payload, context).await?.await
    }

    /// Run the handshake exchange on the reserved id.
    pub async fn handshake<P: Serialize + ?Sized>(
        &self,
        payload: &P,
    ) -> Result<serde_json::Value, BridgeError> {
        let payload = serde_json::to_value(payload)?;
        let _order = self.send_order.lock().await;

        let (responder, receiver) = oneshot::channel();
        {
            let mut table = self.table.lock().await;
            if table.closed {
                return Err(BridgeError::ChannelClosed);
            }
            if table.handshake.is_some() {
                return Err(BridgeError::HandshakeFailed(
                    "a handshake is already in flight".into(),
                ));
            }
            table.handshake = Some(responder);
        }

        let envelope = RequestEnvelope {
            id: RequestId::HANDSHAKE,
            method: HANDSHAKE_METHOD.to_string(),
            payload,
        };

        if let Err(e) = self.outbound.post(envelope).await {
            tracing::warn!(error = %e, "Failed to write handshake to channel");
            self.table.lock().await.handshake = None;
            return Err(BridgeError::ChannelClosed);
        }
        drop(_order);

        tracing::debug!("Handshake sent");
        receiver.await.unwrap_or(Err(BridgeError::ChannelClosed))
    }

    /// Deliver an inbound response to whoever is waiting for it.
    ///
    /// Responses for unknown ids are discarded.
    pub async fn resolve(&self, response: ResponseEnvelope) {
        let id = response.id;

        if id == RequestId::HANDSHAKE {
            let responder = self.table.lock().await.handshake.take();
            match responder {
                Some(responder) => {
                    let _ = responder.send(response.into_outcome());
                }
                None => {
                    self.metrics.record_stray();
                    tracing::debug!("Stray handshake response discarded");
                }
            }
            return;
        }

        let Some(pending) = self.table.lock().await.pending.remove(&id) else {
            self.metrics.record_stray();
            tracing::debug!(id = %id, "Response for unknown id discarded");
            return;
        };

        let outcome = response.into_outcome();
        self.metrics.record_matched(outcome.is_err());
        tracing::debug!(
            id = %id,
            method = %pending.method,
            issued_context = %pending.issued_context,
            ok = outcome.is_ok(),
            "Response matched"
        );

        if pending.responder.send(outcome).is_err() {
            tracing::trace!(id = %id, "Caller abandoned request before its response arrived");
        }
    }

    /// Reject every outstanding request with `ChannelClosed` and refuse new
    /// ones. Returns how many callers were rejected.
    pub async fn close(&self) -> usize {
        let (pending, handshake) = {
            let mut table = self.table.lock().await;
            if table.closed {
                return 0;
            }
            table.closed = true;
            let pending: Vec<_> = table.pending.drain().collect();
            (pending, table.handshake.take())
        };

        let rejected = pending.len() + usize::from(handshake.is_some());
        self.metrics.record_closure_rejections(rejected as u64);
        tracing::info!(rejected, "Channel closed, rejecting pending requests");

        for (id, request) in pending {
            tracing::debug!(id = %id, method = %request.method, "Rejecting pending request: channel closed");
            let _ = request.responder.send(Err(BridgeError::ChannelClosed));
        }
        if let Some(responder) = handshake {
            let _ = responder.send(Err(BridgeError::ChannelClosed));
        }

        rejected
    }

    /// Drop a pending entry whose caller stopped waiting.
    pub async fn forget(&self, id: RequestId) -> bool {
        self.table.lock().await.pending.remove(&id).is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.table.lock().await.closed
    }
}

/// Future of a single issued request.
///
/// Dropping it abandons the result; the correlator entry is still cleaned up
/// when the response arrives or the channel closes.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    method: String,
    receiver: oneshot::Receiver<Result<serde_json::Value, BridgeError>>,
}

impl PendingReply {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for PendingReply {
    type Output = Result<serde_json::Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Responder dropped without an answer: the table was torn down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
