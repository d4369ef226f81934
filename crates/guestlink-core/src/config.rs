use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::context::FrameContext;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct GuestlinkConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub host: HostSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Per-request deadline. Unset means callers wait until the host answers
    /// or the channel closes.
    pub request_timeout_ms: Option<u64>,
    /// Contexts the guest agrees to run in; the handshake fails otherwise.
    pub allowed_contexts: Option<Vec<FrameContext>>,
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_channel_buffer() -> usize {
    64
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            allowed_contexts: None,
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// How to launch the host process the guest talks to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostSettings {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl GuestlinkConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        let default = Self::default_path();
        if default.exists() {
            tracing::debug!(path = %default.display(), "Loading default config");
            Self::from_file(&default)
        } else {
            Ok(Self::default())
        }
    }

    /// Default config location: ~/.guestlink/guestlink.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".guestlink")
            .join("guestlink.toml")
    }
}
