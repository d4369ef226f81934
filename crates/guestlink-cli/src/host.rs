use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use guestlink_core::config::{BridgeSettings, HostSettings};
use guestlink_core::metrics::{BridgeMetrics, LoggingMetricsBackend};
use guestlink_core::{Bridge, JsonLinesChannel};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How to start the host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLaunch {
    pub command: String,
    pub args: Vec<String>,
}

impl HostLaunch {
    /// Command-line flags win over `[host]` in the config file. Args given on
    /// the command line replace the configured args entirely.
    pub fn resolve(
        config: &HostSettings,
        host_bin: Option<String>,
        host_args: Vec<String>,
    ) -> Result<Self> {
        let Some(command) = host_bin.or_else(|| config.command.clone()) else {
            bail!("no host command configured: pass --host-bin or set [host].command");
        };
        let args = if host_args.is_empty() {
            config.args.clone()
        } else {
            host_args
        };
        Ok(Self { command, args })
    }
}

/// A running host process with an initialized bridge attached to its stdio.
pub struct Session {
    pub bridge: Bridge,
    child: Child,
    inbound: JoinHandle<()>,
}

pub async fn connect(launch: &HostLaunch, settings: BridgeSettings) -> Result<Session> {
    tracing::info!(command = %launch.command, args = ?launch.args, "Spawning host");

    let mut child = Command::new(&launch.command)
        .args(&launch.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn host `{}`", launch.command))?;

    let stdin = child.stdin.take().context("host stdin was not captured")?;
    let stdout = child.stdout.take().context("host stdout was not captured")?;

    let (outbound, inbound) =
        JsonLinesChannel::spawn(stdout, stdin, settings.channel_buffer).into_parts();

    let metrics = Arc::new(BridgeMetrics::with_backend(Arc::new(LoggingMetricsBackend)));
    let bridge = Bridge::with_metrics(outbound, settings, metrics);
    let inbound = bridge.spawn_inbound(inbound);

    let context = bridge
        .initialize()
        .await
        .context("handshake with host failed")?;
    tracing::info!(%context, "Bridge ready");

    Ok(Session {
        bridge,
        child,
        inbound,
    })
}

impl Session {
    /// Kill the host. Its pipes close, which ends the channel tasks.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Host already exited");
        }
        self.inbound.abort();
        let rejected = self.bridge.channel_closed().await;
        if rejected > 0 {
            tracing::warn!(rejected, "Requests still pending at shutdown");
        }
    }
}
