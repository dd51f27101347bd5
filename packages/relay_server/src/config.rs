use anyhow::{Context, Result, bail};
use relay_hub::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   relay.toml:      [connection]
//                    pong_wait_secs = 30
//
//   env var:         RELAY_CONNECTION__PONG_WAIT_SECS=30   (double underscore = nesting)
//
//   CLI:             --host / --port override the [server] section

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
}

/// Listener and static assets (lives under `[server]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Coordinator tunables (lives under `[hub]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

/// Per-connection tunables (lives under `[connection]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            max_message_bytes: default_max_message_bytes(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_inbox_capacity() -> usize {
    relay_hub::DEFAULT_INBOX_CAPACITY
}
fn default_outbound_capacity() -> usize {
    256
}
fn default_max_message_bytes() -> usize {
    512
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_write_wait_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → relay.toml → RELAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
///   `RELAY_CONNECTION__MAX_MESSAGE_BYTES=1024`  →  `connection.max_message_bytes = 1024`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("RELAY_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Listener configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/public`
    pub static_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
            static_dir: fc.static_dir.clone(),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Per-connection pump settings (runtime view).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Outbound events buffered per connection before it is evicted
    pub outbound_capacity: usize,
    /// Largest inbound message accepted from a peer
    pub max_message_bytes: usize,
    /// Time allowed between pongs before the peer is considered dead
    pub pong_wait: Duration,
    /// Interval between pings; always shorter than `pong_wait`
    pub ping_period: Duration,
    /// Time allowed for a single write
    pub write_wait: Duration,
}

/// Upper bound for `pong_wait_secs` and `write_wait_secs` (one day)
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Result<Self> {
        if fc.pong_wait_secs > MAX_WAIT_SECS {
            bail!(
                "connection.pong_wait_secs = {} exceeds the maximum of {}",
                fc.pong_wait_secs,
                MAX_WAIT_SECS
            );
        }
        if fc.write_wait_secs > MAX_WAIT_SECS {
            bail!(
                "connection.write_wait_secs = {} exceeds the maximum of {}",
                fc.write_wait_secs,
                MAX_WAIT_SECS
            );
        }

        Ok(Self::with_pong_wait(
            Duration::from_secs(fc.pong_wait_secs.max(1)),
            Duration::from_secs(fc.write_wait_secs.max(1)),
            fc.outbound_capacity,
            fc.max_message_bytes,
        ))
    }

    /// Derive the ping period as 9/10 of the pong wait.
    pub fn with_pong_wait(
        pong_wait: Duration,
        write_wait: Duration,
        outbound_capacity: usize,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            outbound_capacity: outbound_capacity.max(1),
            max_message_bytes,
            pong_wait,
            ping_period: pong_wait - pong_wait / 10,
            write_wait,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::with_pong_wait(
            Duration::from_secs(default_pong_wait_secs()),
            Duration::from_secs(default_write_wait_secs()),
            default_outbound_capacity(),
            default_max_message_bytes(),
        )
    }
}

pub fn hub_config(fc: &HubFileConfig) -> HubConfig {
    HubConfig {
        inbox_capacity: fc.inbox_capacity,
    }
}
