//! Troof daemon: entry point for running a presence hub.

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use troof_hub::{HubConfig, HubNode};
use troof_types::{DriftPolicy, IdentityKind};
use troof_utils::LogFormat;

#[derive(Parser)]
#[command(name = "troof-daemon", about = "Troof presence-verification hub")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "TROOF_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long, env = "TROOF_LISTEN_ADDR")]
    listen_addr: Option<IpAddr>,

    /// WebSocket port.
    #[arg(long, env = "TROOF_PORT")]
    port: Option<u16>,

    /// Directory for the key and roster files.
    #[arg(long, env = "TROOF_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Shared secret connections must present with `auth`.
    #[arg(long, env = "TROOF_HUB_TOKEN", hide_env_values = true)]
    hub_token: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TROOF_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TROOF_LOG_LEVEL")]
    log_level: Option<String>,

    /// Identity kind assumed for roster keys: "uuid", "email" or "displayName".
    #[arg(long, env = "TROOF_IDENTITY_KIND", value_parser = parse_identity_kind)]
    identity_kind: Option<IdentityKind>,

    /// Reject signed responses that carry no challenge id.
    #[arg(long, env = "TROOF_REQUIRE_CHALLENGE")]
    require_challenge: bool,

    /// Reaction to posture drift: "flag" or "reject".
    #[arg(long, env = "TROOF_DRIFT_POLICY", value_parser = parse_drift_policy)]
    drift_policy: Option<DriftPolicy>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn parse_identity_kind(s: &str) -> Result<IdentityKind, String> {
    IdentityKind::parse(s).map_err(|e| e.to_string())
}

fn parse_drift_policy(s: &str) -> Result<DriftPolicy, String> {
    match s.to_ascii_lowercase().as_str() {
        "flag" => Ok(DriftPolicy::Flag),
        "reject" => Ok(DriftPolicy::Reject),
        other => Err(format!("unknown drift policy: {other}")),
    }
}

impl Cli {
    /// Layer flags and env vars over the file (or default) configuration.
    fn apply(self, base: HubConfig) -> HubConfig {
        let mut config = base;
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if self.hub_token.is_some() {
            config.hub_token = self.hub_token;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(kind) = self.identity_kind {
            config.identity_kind = kind;
        }
        config.params.require_challenge |= self.require_challenge;
        if let Some(policy) = self.drift_policy {
            config.params.drift_policy = policy;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => HubConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HubConfig::default(),
    };
    let print_config = cli.print_config;
    let config = cli.apply(base);
    config.validate()?;

    if print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    troof_utils::init_logging(config.log_format, &config.log_level);
    tracing::info!(
        "Starting Troof hub on {} (data dir {})",
        config.socket_addr(),
        config.data_dir.display()
    );

    let mut node = HubNode::new(config)?;
    node.start().await?;
    node.wait_for_shutdown().await;

    tracing::info!("Shutdown signal received, stopping hub");
    node.stop().await?;

    tracing::info!("Troof daemon exited cleanly");
    Ok(())
}
