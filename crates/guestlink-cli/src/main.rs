use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guestlink_core::FrameContext;
use guestlink_core::config::GuestlinkConfig;
use guestlink_geo::{GeoLocation, Location};
use tracing_subscriber::{EnvFilter, fmt};

mod host;
mod mock_host;

#[derive(Parser)]
#[command(
    name = "guestlink",
    version,
    about = "guestlink — talk to a host process through the capability-gated RPC bridge"
)]
struct Cli {
    /// Path to guestlink.toml (defaults to ~/.guestlink/guestlink.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host executable to spawn; overrides [host].command
    #[arg(long, global = true)]
    host_bin: Option<String>,

    /// Argument passed to the host executable (repeatable); overrides [host].args
    #[arg(long = "host-arg", global = true, allow_hyphen_values = true)]
    host_args: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one gated request and print the host's result as JSON
    Call {
        /// Method name, e.g. `permissions.has`
        method: String,
        /// JSON payload
        #[arg(long, default_value = "null")]
        payload: String,
        /// Context the call is allowed in (repeatable; none means any)
        #[arg(long = "context")]
        contexts: Vec<FrameContext>,
        /// Dotted capability path that must be enabled, e.g. `geoLocation.map`
        #[arg(long)]
        capability: Option<String>,
    },
    /// Check whether the host advertises a capability
    Supports {
        /// Dotted capability path
        path: String,
    },
    /// Geolocation operations
    Geo {
        #[command(subcommand)]
        action: GeoAction,
    },
    /// Act as a scripted host on stdio (for testing)
    #[command(hide = true)]
    MockHost {
        /// Context to place the guest in
        #[arg(long, default_value = "content")]
        context: FrameContext,
        /// Capability tree to advertise, as JSON
        #[arg(long, default_value = r#"{"geoLocation":{"map":{}}}"#)]
        capabilities: String,
        /// Answer permission queries with `false`
        #[arg(long)]
        deny_permissions: bool,
    },
}

#[derive(Subcommand)]
enum GeoAction {
    /// Print the current location
    Location,
    /// Print whether location permission is granted
    HasPermission,
    /// Ask for location permission
    RequestPermission,
    /// Let the user choose a location on a map
    ChooseLocation,
    /// Show a location on a map
    ShowLocation {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries results (or the channel in mock-host mode)
    fmt()
        .with_env_filter(EnvFilter::from_env("GUESTLINK_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::MockHost {
        context,
        capabilities,
        deny_permissions,
    } = &cli.command
    {
        let capabilities = serde_json::from_str(capabilities)
            .context("--capabilities must be a JSON capability tree")?;
        return mock_host::serve(mock_host::Script {
            context: *context,
            capabilities,
            grant_permissions: !deny_permissions,
        })
        .await;
    }

    let config = GuestlinkConfig::load(cli.config.as_deref())?;
    let launch = host::HostLaunch::resolve(&config.host, cli.host_bin, cli.host_args)?;
    let session = host::connect(&launch, config.bridge).await?;

    let output = run(&session, cli.command).await;
    session.shutdown().await;

    let value = output?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run(session: &host::Session, command: Command) -> Result<serde_json::Value> {
    let gate = session.bridge.gate();

    let value = match command {
        Command::Call {
            method,
            payload,
            contexts,
            capability,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let path: Option<Vec<&str>> = capability.as_deref().map(|c| c.split('.').collect());
            gate.invoke::<_, serde_json::Value>(&method, &payload, &contexts, path.as_deref())
                .await?
        }
        Command::Supports { path } => {
            serde_json::Value::Bool(session.bridge.capabilities().supports_dotted(&path))
        }
        Command::Geo { action } => {
            let geo = GeoLocation::new(gate);
            match action {
                GeoAction::Location => serde_json::to_value(geo.get_current_location().await?)?,
                GeoAction::HasPermission => serde_json::Value::Bool(geo.has_permission().await?),
                GeoAction::RequestPermission => {
                    serde_json::Value::Bool(geo.request_permission().await?)
                }
                GeoAction::ChooseLocation => {
                    serde_json::to_value(geo.map().choose_location().await?)?
                }
                GeoAction::ShowLocation { lat, lon } => {
                    geo.map().show_location(&Location::new(lat, lon)).await?;
                    serde_json::Value::Null
                }
            }
        }
        Command::MockHost { .. } => unreachable!("handled before connecting"),
    };

    tracing::info!(metrics = ?session.bridge.metrics().snapshot(), "Bridge metrics");
    Ok(value)
}
