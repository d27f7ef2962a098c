use anyhow::{Context, Result, bail};
use hub_protocol::Encoding;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [hub]
//                    encoding = "messagepack"
//
//   env var:         ECHO_HUB_HUB__ENCODING=messagepack   (double underscore = nesting)
//
//   CLI:             echo-hub --encoding messagepack
//
//   (single underscore stays within field names: ECHO_HUB_HUB__SEND_TIMEOUT_MS)

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
}

/// Listener address (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Hub tunables (lives under `[hub]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    /// Endpoint the hub is mapped at. Negotiate lives at `{path}/negotiate`.
    #[serde(default = "default_hub_path")]
    pub path: String,
    #[serde(default)]
    pub encoding: Encoding,
    /// Whether the caller receives its own broadcast.
    #[serde(default = "default_include_sender")]
    pub include_sender: bool,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            path: default_hub_path(),
            encoding: Encoding::default(),
            include_sender: default_include_sender(),
            send_timeout_ms: default_send_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            send_channel_capacity: default_send_channel_capacity(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_hub_path() -> String {
    "/TestHub".to_string()
}
fn default_include_sender() -> bool {
    true
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_handshake_timeout_ms() -> u64 {
    15_000
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_send_channel_capacity() -> usize {
    64
}
fn default_max_message_bytes() -> usize {
    32 * 1024
}

/// Values given on the command line. They sit above every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub encoding: Option<Encoding>,
}

/// Build a figment that layers: defaults → config.toml → ECHO_HUB_* env vars → CLI.
///
/// Env vars use double-underscore for nesting into sections:
///   `ECHO_HUB_SERVER__PORT=5050`  →  `server.port = 5050`
///   `ECHO_HUB_HUB__INCLUDE_SENDER=false`  →  `hub.include_sender = false`
pub fn load_config(config_path: Option<&Path>, cli: &CliOverrides) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("ECHO_HUB_").split("__"));

    if let Some(host) = &cli.host {
        figment = figment.merge(Serialized::default("server.host", host));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(encoding) = cli.encoding {
        figment = figment.merge(Serialized::default("hub.encoding", encoding));
    }
    figment
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Listener configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", fc.host, fc.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", fc.host, fc.port))?;
        Ok(Self { bind_addr })
    }
}

/// Hub configuration (runtime view).
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub path: String,
    /// Chosen once at startup; the only protocol the handshake accepts.
    pub encoding: Encoding,
    pub include_sender: bool,
    pub send_timeout: Duration,
    pub handshake_timeout: Duration,
    pub drain_timeout: Duration,
    pub send_channel_capacity: usize,
    pub max_message_bytes: usize,
}

impl HubConfig {
    pub fn from_file(fc: &HubFileConfig) -> Result<Self> {
        if !fc.path.starts_with('/') || fc.path.len() < 2 {
            bail!("hub.path must start with '/' and name an endpoint, got {:?}", fc.path);
        }
        if fc.path.ends_with('/') {
            bail!("hub.path must not end with '/', got {:?}", fc.path);
        }
        if fc.send_channel_capacity == 0 {
            bail!("hub.send_channel_capacity must be at least 1");
        }
        if fc.max_message_bytes == 0 {
            bail!("hub.max_message_bytes must be at least 1");
        }
        Ok(Self {
            path: fc.path.clone(),
            encoding: fc.encoding,
            include_sender: fc.include_sender,
            send_timeout: Duration::from_millis(fc.send_timeout_ms),
            handshake_timeout: Duration::from_millis(fc.handshake_timeout_ms),
            drain_timeout: Duration::from_millis(fc.drain_timeout_ms),
            send_channel_capacity: fc.send_channel_capacity,
            max_message_bytes: fc.max_message_bytes,
        })
    }

    pub fn negotiate_path(&self) -> String {
        format!("{}/negotiate", self.path)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        let fc = HubFileConfig::default();
        Self {
            path: fc.path,
            encoding: fc.encoding,
            include_sender: fc.include_sender,
            send_timeout: Duration::from_millis(fc.send_timeout_ms),
            handshake_timeout: Duration::from_millis(fc.handshake_timeout_ms),
            drain_timeout: Duration::from_millis(fc.drain_timeout_ms),
            send_channel_capacity: fc.send_channel_capacity,
            max_message_bytes: fc.max_message_bytes,
        }
    }
}
