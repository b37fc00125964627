use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tidbyt_relay::{BusConfig, Config, Pipeline, PushConfig, TemplateSet};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidbyt-relay", version, about)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "HTTP_IP", default_value = "0.0.0.0")]
    http_ip: IpAddr,

    /// Port to bind the HTTP server to.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    /// Directory for per-request source documents and artifacts.
    #[arg(long, env = "SCRATCH_DIR", default_value = "/tmp")]
    scratch_dir: PathBuf,

    /// Directory holding `notify.star`, `image.star` and `icons/`.
    #[arg(long, env = "TEMPLATE_DIR", default_value = "./templates")]
    template_dir: PathBuf,

    /// Always return rendered images and log at debug level.
    #[arg(long, env = "DEBUG_MODE")]
    debug_mode: bool,

    /// Renderer executable.
    #[arg(long, env = "RENDERER_BIN", default_value = tidbyt_relay::config::DEFAULT_RENDERER_BIN)]
    renderer_bin: PathBuf,

    /// Upper bound in seconds for a single renderer invocation.
    #[arg(long, env = "RENDER_TIMEOUT_SECS", default_value_t = 30)]
    render_timeout_secs: u64,

    /// Maximum accepted `/api/image` body size in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = tidbyt_relay::config::DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Tidbyt cloud API base URL.
    #[arg(long, env = "TIDBYT_API_URL", default_value = tidbyt_relay::config::DEFAULT_API_URL)]
    tidbyt_api_url: String,

    /// Tidbyt API key. Cloud push is enabled when both key and device id are set.
    #[arg(long, env = "TIDBYT_API_KEY", hide_env_values = true)]
    tidbyt_api_key: Option<String>,

    /// Tidbyt device id.
    #[arg(long, env = "TIDBYT_DEVICE_ID")]
    tidbyt_device_id: Option<String>,

    /// MQTT broker host. Bus publishing is enabled when set.
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_PORT", default_value_t = tidbyt_relay::config::DEFAULT_MQTT_PORT)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Base topic; artifacts are published to `<topic>/applet`.
    #[arg(long, env = "MQTT_TOPIC", default_value = tidbyt_relay::config::DEFAULT_MQTT_TOPIC)]
    mqtt_topic: String,
}

impl Cli {
    fn into_config(self) -> Config {
        let bus = self
            .mqtt_host
            .filter(|h| !h.is_empty())
            .map(|host| {
                let mut bus = BusConfig::new(host);
                bus.port = self.mqtt_port;
                bus.username = self.mqtt_username.filter(|u| !u.is_empty());
                bus.password = self.mqtt_password;
                bus.topic = self.mqtt_topic;
                bus
            });
        Config {
            bind: SocketAddr::new(self.http_ip, self.http_port),
            scratch_dir: self.scratch_dir,
            template_dir: self.template_dir,
            debug: self.debug_mode,
            renderer_bin: self.renderer_bin,
            render_timeout: Duration::from_secs(self.render_timeout_secs),
            max_upload_bytes: self.max_upload_bytes,
            push: PushConfig::from_parts(
                self.tidbyt_api_url,
                self.tidbyt_api_key,
                self.tidbyt_device_id,
            ),
            bus,
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug_mode);

    let config = cli.into_config();
    config.validate()?;
    let templates = TemplateSet::load(&config.template_dir)
        .with_context(|| format!("load templates from '{}'", config.template_dir.display()))?;
    tracing::info!(
        bind = %config.bind,
        templates = ?templates.names(),
        push = config.push.is_some(),
        publish = config.bus.is_some(),
        "starting tidbyt-relay"
    );

    let bind = config.bind;
    let pipeline = Pipeline::from_config(config, templates);
    if !pipeline.renderer().is_available().await {
        tracing::warn!(
            bin = %pipeline.renderer().bin().display(),
            "renderer not found; requests will be accepted but not rendered"
        );
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tidbyt_relay::serve(listener, tidbyt_relay::router(pipeline)).await?;
    Ok(())
}
