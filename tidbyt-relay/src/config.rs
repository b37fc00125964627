use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::foundation::error::{RelayError, RelayResult};

/// Default renderer executable looked up on `PATH`.
pub const DEFAULT_RENDERER_BIN: &str = "pixlet";
/// Default cap on request bodies (4 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 4096 * 1024;
/// Default Tidbyt cloud API base URL.
pub const DEFAULT_API_URL: &str = "https://api.tidbyt.com";
/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;
/// Default base topic; artifacts are published to `<topic>/applet`.
pub const DEFAULT_MQTT_TOPIC: &str = "tidbyt";

/// Process-wide configuration. Built once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP bind address.
    pub bind: SocketAddr,
    /// Directory holding per-request source documents and artifacts.
    pub scratch_dir: PathBuf,
    /// Directory holding `*.star` templates and the `icons/` directory.
    pub template_dir: PathBuf,
    /// Debug mode: rendered artifacts are always streamed back to the caller.
    pub debug: bool,
    /// Renderer executable name or path.
    pub renderer_bin: PathBuf,
    /// Upper bound for a single renderer invocation.
    pub render_timeout: Duration,
    /// Maximum accepted request body size in bytes for `/api/notify` and `/api/image`.
    pub max_upload_bytes: usize,
    /// Cloud push credentials. `None` disables the push channel.
    pub push: Option<PushConfig>,
    /// Message-bus connection. `None` disables the publish channel.
    pub bus: Option<BusConfig>,
}

/// Credentials for pushing artifacts through the Tidbyt cloud API.
#[derive(Clone, Debug)]
pub struct PushConfig {
    /// API base URL passed to `push --url`.
    pub api_url: String,
    /// API token passed to `push --api-token`.
    pub api_key: String,
    /// Target device id.
    pub device_id: String,
}

impl PushConfig {
    /// Build push credentials, or `None` when either the key or the device id is empty.
    pub fn from_parts(
        api_url: impl Into<String>,
        api_key: Option<String>,
        device_id: Option<String>,
    ) -> Option<Self> {
        let api_key = api_key.filter(|s| !s.is_empty())?;
        let device_id = device_id.filter(|s| !s.is_empty())?;
        Some(Self {
            api_url: api_url.into(),
            api_key,
            device_id,
        })
    }
}

/// MQTT broker connection parameters.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional login; credentials are sent only when set.
    pub username: Option<String>,
    /// Password for `username`.
    pub password: Option<String>,
    /// Base topic. Messages go to `<topic>/applet`.
    pub topic: String,
}

impl BusConfig {
    /// Minimal broker configuration with default port and topic.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            topic: DEFAULT_MQTT_TOPIC.to_string(),
        }
    }

    /// Full topic applet artifacts are published to.
    pub fn applet_topic(&self) -> String {
        format!("{}/applet", self.topic.trim_end_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            scratch_dir: std::env::temp_dir(),
            template_dir: PathBuf::from("templates"),
            debug: false,
            renderer_bin: PathBuf::from(DEFAULT_RENDERER_BIN),
            render_timeout: Duration::from_secs(30),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            push: None,
            bus: None,
        }
    }
}

impl Config {
    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> RelayResult<()> {
        if self.bind.port() == 0 {
            return Err(RelayError::config("http port must be non-zero"));
        }
        if self.render_timeout.is_zero() {
            return Err(RelayError::config("render timeout must be non-zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(RelayError::config("max upload size must be non-zero"));
        }
        if !self.scratch_dir.is_dir() {
            return Err(RelayError::config(format!(
                "scratch directory '{}' does not exist",
                self.scratch_dir.display()
            )));
        }
        if let Some(bus) = &self.bus {
            if bus.host.is_empty() {
                return Err(RelayError::config("mqtt host must be non-empty"));
            }
            if bus.port == 0 {
                return Err(RelayError::config("mqtt port must be non-zero"));
            }
        }
        Ok(())
    }

    /// Set the scratch directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Set the template directory.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    /// Set the renderer executable.
    pub fn with_renderer_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.renderer_bin = bin.into();
        self
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
