//! Hub configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use troof_presence::EnrollmentCode;
use troof_types::{HubParams, IdentityKind};
use troof_utils::LogFormat;

use crate::HubError;

/// Configuration for a hub node.
///
/// Can be loaded from a TOML file via [`HubConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Address the WebSocket server binds.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,

    /// WebSocket port. `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for the key and roster files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Shared secret connections must present before anything else.
    #[serde(default)]
    pub hub_token: Option<String>,

    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Kind assumed for roster keys that do not state one.
    #[serde(default = "default_identity_kind")]
    pub identity_kind: IdentityKind,

    /// Seconds between server pings.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Events buffered per slow observer before it lags.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Enrollment code table.
    #[serde(default)]
    pub enrollment: Vec<EnrollmentCode>,

    /// Protocol tunables.
    #[serde(default)]
    pub params: HubParams,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./troof_data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_identity_kind() -> IdentityKind {
    IdentityKind::Email
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

// ── Impl ───────────────────────────────────────────────────────────────

impl HubConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HubError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, HubError> {
        let config: Self = toml::from_str(s).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, HubError> {
        toml::to_string_pretty(self).map_err(|e| HubError::Config(e.to_string()))
    }

    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<(), HubError> {
        let p = &self.params;
        if p.challenge_ttl_ms == 0 {
            return Err(HubError::Config("params.challenge_ttl_ms must be positive".into()));
        }
        if p.bucket_capacity == 0 || p.bucket_refill_ms == 0 {
            return Err(HubError::Config(
                "params.bucket_capacity and params.bucket_refill_ms must be positive".into(),
            ));
        }
        if p.sweep_interval_ms == 0 {
            return Err(HubError::Config("params.sweep_interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&p.trust_weight) {
            return Err(HubError::Config("params.trust_weight must be within 0..=1".into()));
        }
        if self.heartbeat_secs == 0 {
            return Err(HubError::Config("heartbeat_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            data_dir: default_data_dir(),
            hub_token: None,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            identity_kind: default_identity_kind(),
            heartbeat_secs: default_heartbeat_secs(),
            event_buffer: default_event_buffer(),
            enrollment: Vec::new(),
            params: HubParams::default(),
        }
    }
}
