//! Cross-boundary RPC bridge between an embedded guest and its host.
//!
//! Feature modules never talk to the channel directly. They go through a
//! [`CallGate`], which checks the lifecycle state and the negotiated
//! capabilities before handing the request to the [`Correlator`].
//!
//! ```rust,no_run
//! use guestlink_core::{Bridge, FrameContext, JsonLinesChannel};
//! use guestlink_core::config::BridgeSettings;
//!
//! # async fn run() -> Result<(), guestlink_core::BridgeError> {
//! let channel = JsonLinesChannel::spawn(tokio::io::stdin(), tokio::io::stdout(), 64);
//! let (outbound, inbound) = channel.into_parts();
//!
//! let bridge = Bridge::new(outbound, BridgeSettings::default());
//! bridge.spawn_inbound(inbound);
//! bridge.initialize().await?;
//!
//! let allowed: bool = bridge
//!     .gate()
//!     .invoke("permissions.has", "geolocation", &[FrameContext::Content], None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod capability;
pub mod channel;
pub mod config;
pub mod context;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod metrics;

pub use bridge::Bridge;
pub use capability::{CapabilityNode, CapabilityRegistry};
pub use channel::{JsonLinesChannel, Outbound};
pub use context::FrameContext;
pub use correlator::{Correlator, PendingReply};
pub use envelope::{HostEvent, HostMessage, RequestEnvelope, RequestId, ResponseEnvelope};
pub use error::{BridgeError, ErrorCode};
pub use gate::{CallGate, Operation};
pub use lifecycle::{LifecycleState, LifecycleTracker};
