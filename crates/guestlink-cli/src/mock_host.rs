//! Scripted host used by the smoke tests. Reads request lines on stdin and
//! answers each on stdout.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use guestlink_core::correlator::HANDSHAKE_METHOD;
use guestlink_core::{CapabilityNode, ErrorCode, FrameContext, RequestEnvelope, ResponseEnvelope};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub struct Script {
    pub context: FrameContext,
    pub capabilities: CapabilityNode,
    pub grant_permissions: bool,
}

impl Script {
    fn answer(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        let id = request.id;
        match request.method.as_str() {
            HANDSHAKE_METHOD => ResponseEnvelope::success(
                id,
                serde_json::json!({
                    "context": self.context,
                    "capabilities": self.capabilities,
                }),
            ),
            "location.getLocation" => ResponseEnvelope::success(
                id,
                serde_json::json!({
                    "latitude": 47.6397,
                    "longitude": -122.1283,
                    "accuracy": 25.0,
                    "timestamp": now_millis(),
                }),
            ),
            "location.showLocation" => ResponseEnvelope::success(id, serde_json::Value::Null),
            "permissions.has" | "permissions.request" => {
                ResponseEnvelope::success(id, serde_json::Value::Bool(self.grant_permissions))
            }
            other => ResponseEnvelope::failure(
                id,
                ErrorCode::NOT_SUPPORTED_ON_PLATFORM,
                format!("mock host does not implement {other}"),
            ),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub async fn serve(script: Script) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RequestEnvelope = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Mock host skipping malformed line");
                continue;
            }
        };
        tracing::debug!(id = %request.id, method = %request.method, "Mock host request");

        let mut out = serde_json::to_vec(&script.answer(&request))?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}
