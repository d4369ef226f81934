use serde::{Deserialize, Serialize};

use crate::capability::CapabilityNode;
use crate::context::FrameContext;
use crate::error::{BridgeError, ErrorCode};

/// Correlation id binding one outbound request to its inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Reserved for the handshake exchange; never allocated to a request.
    pub const HANDSHAKE: RequestId = RequestId(0);
    pub const FIRST: RequestId = RequestId(1);
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guest -> host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Host -> guest response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error_code: None,
            message: None,
        }
    }

    pub fn failure(id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error_code: Some(code),
            message: Some(message.into()),
        }
    }

    /// Convert into the outcome delivered to the waiting caller.
    pub fn into_outcome(self) -> Result<serde_json::Value, BridgeError> {
        if self.ok {
            Ok(self.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(BridgeError::HostError {
                code: self.error_code.unwrap_or(ErrorCode::INTERNAL_ERROR),
                message: self.message,
            })
        }
    }
}

/// Unsolicited notification from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    ContextChanged { context: FrameContext },
}

/// Anything the host may put on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Response(ResponseEnvelope),
    Event(HostEvent),
}

/// Payload the guest sends with the handshake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_contexts: Option<Vec<FrameContext>>,
}

/// The host's answer to the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub context: FrameContext,
    #[serde(default = "CapabilityNode::empty")]
    pub capabilities: CapabilityNode,
}
