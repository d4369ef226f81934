use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::FrameContext;

/// Numeric error code as reported by the host.
///
/// Hosts may send codes that are not listed here; they are carried through
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    pub const NOT_SUPPORTED_ON_PLATFORM: ErrorCode = ErrorCode(100);
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode(404);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(500);
    pub const NOT_SUPPORTED_IN_CURRENT_CONTEXT: ErrorCode = ErrorCode(501);
    pub const PERMISSION_DENIED: ErrorCode = ErrorCode(1000);
    pub const NETWORK_ERROR: ErrorCode = ErrorCode(2000);
    pub const NO_HW_SUPPORT: ErrorCode = ErrorCode(3000);
    pub const INVALID_ARGUMENTS: ErrorCode = ErrorCode(4000);
    pub const UNAUTHORIZED_USER_OPERATION: ErrorCode = ErrorCode(5000);
    pub const INSUFFICIENT_RESOURCES: ErrorCode = ErrorCode(6000);
    pub const THROTTLE: ErrorCode = ErrorCode(7000);
    pub const USER_ABORT: ErrorCode = ErrorCode(8000);
    pub const OPERATION_TIMED_OUT: ErrorCode = ErrorCode(8001);
    pub const OLD_PLATFORM: ErrorCode = ErrorCode(9000);
    pub const SIZE_EXCEEDED: ErrorCode = ErrorCode(10000);

    /// Symbolic name for known codes.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::NOT_SUPPORTED_ON_PLATFORM => "NOT_SUPPORTED_ON_PLATFORM",
            Self::FILE_NOT_FOUND => "FILE_NOT_FOUND",
            Self::INTERNAL_ERROR => "INTERNAL_ERROR",
            Self::NOT_SUPPORTED_IN_CURRENT_CONTEXT => "NOT_SUPPORTED_IN_CURRENT_CONTEXT",
            Self::PERMISSION_DENIED => "PERMISSION_DENIED",
            Self::NETWORK_ERROR => "NETWORK_ERROR",
            Self::NO_HW_SUPPORT => "NO_HW_SUPPORT",
            Self::INVALID_ARGUMENTS => "INVALID_ARGUMENTS",
            Self::UNAUTHORIZED_USER_OPERATION => "UNAUTHORIZED_USER_OPERATION",
            Self::INSUFFICIENT_RESOURCES => "INSUFFICIENT_RESOURCES",
            Self::THROTTLE => "THROTTLE",
            Self::USER_ABORT => "USER_ABORT",
            Self::OPERATION_TIMED_OUT => "OPERATION_TIMED_OUT",
            Self::OLD_PLATFORM => "OLD_PLATFORM",
            Self::SIZE_EXCEEDED => "SIZE_EXCEEDED",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is not initialized")]
    NotInitialized,

    #[error("call not allowed in context {current} (allowed: {})", format_contexts(.allowed))]
    WrongContext {
        current: FrameContext,
        allowed: Vec<FrameContext>,
    },

    #[error("capability '{capability}' is not supported on this platform")]
    NotSupportedOnPlatform { capability: String },

    #[error("host rejected request: {code}{}", format_message(.message))]
    HostError {
        code: ErrorCode,
        message: Option<String>,
    },

    #[error("channel closed before a response arrived")]
    ChannelClosed,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unexpected response to '{method}': {source}")]
    InvalidResponse {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request '{method}' timed out after {after:?}")]
    TimedOut { method: String, after: Duration },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Map the error onto the host's error-code space.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::NotInitialized => ErrorCode::INTERNAL_ERROR,
            BridgeError::WrongContext { .. } => ErrorCode::NOT_SUPPORTED_IN_CURRENT_CONTEXT,
            BridgeError::NotSupportedOnPlatform { .. } => ErrorCode::NOT_SUPPORTED_ON_PLATFORM,
            BridgeError::HostError { code, .. } => *code,
            BridgeError::ChannelClosed => ErrorCode::INTERNAL_ERROR,
            BridgeError::HandshakeFailed(_) => ErrorCode::INTERNAL_ERROR,
            BridgeError::InvalidArguments(_) => ErrorCode::INVALID_ARGUMENTS,
            BridgeError::InvalidResponse { .. } => ErrorCode::INTERNAL_ERROR,
            BridgeError::TimedOut { .. } => ErrorCode::OPERATION_TIMED_OUT,
            BridgeError::Serialization(_) => ErrorCode::INVALID_ARGUMENTS,
        }
    }

    /// True for failures raised locally by the gate before anything was sent.
    pub fn is_gate_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::NotInitialized
                | BridgeError::WrongContext { .. }
                | BridgeError::NotSupportedOnPlatform { .. }
        )
    }
}

fn format_message(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

fn format_contexts(contexts: &[FrameContext]) -> String {
    contexts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
