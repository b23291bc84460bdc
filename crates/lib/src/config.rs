//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Per-session settings (webhook, workspace/channel) live in the session config store,
//! not here; this file only holds process-wide settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP API settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Relay engine tunables (default endpoint, reconnect and deletion timing).
    #[serde(default)]
    pub relay: RelayConfig,

    /// Where per-session state is kept on disk.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Protocol bridge the transports connect to.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP API (default 3002).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require a bearer token on /api.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for the API. Overridden by RELAY_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` on every /api request.
    Token,
}

/// Relay engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Endpoint used when a session has no webhook of its own; also the base for workspace/channel endpoints.
    #[serde(default = "default_relay_endpoint")]
    pub default_endpoint: String,

    /// Delay before a dropped connection is re-created.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// How long a deleted id stays blocked from reconnecting or being re-created.
    #[serde(default = "default_deletion_grace_ms")]
    pub deletion_grace_ms: u64,
}

/// On-disk state location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root for credentials, session configs, received media and the diagnostic log (default ~/.relay/data).
    pub data_dir: Option<PathBuf>,
}

/// Protocol bridge connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// WebSocket base URL of the bridge. Overridden by RELAY_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Optional shared secret sent with each bridge connect. Overridden by RELAY_BRIDGE_TOKEN env.
    pub token: Option<String>,
}

fn default_gateway_port() -> u16 {
    3002
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_endpoint() -> String {
    "http://kvoip.localhost:3000/whatsapp/webhook".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_deletion_grace_ms() -> u64 {
    5000
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8085".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_endpoint: default_relay_endpoint(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            deletion_grace_ms: default_deletion_grace_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            token: None,
        }
    }
}

/// Non-empty trimmed value of an env var.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the gateway token: env RELAY_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_non_empty("RELAY_GATEWAY_TOKEN").or_else(|| trimmed(config.gateway.auth.token.as_ref()))
}

/// Resolve the bridge URL: env RELAY_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> String {
    env_non_empty("RELAY_BRIDGE_URL").unwrap_or_else(|| config.bridge.url.trim().to_string())
}

/// Resolve the bridge token: env RELAY_BRIDGE_TOKEN overrides config.
pub fn resolve_bridge_token(config: &Config) -> Option<String> {
    env_non_empty("RELAY_BRIDGE_TOKEN").or_else(|| trimmed(config.bridge.token.as_ref()))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Resolve the data directory: `storage.dataDir` when set, otherwise ~/.relay/data.
pub fn resolve_data_dir(config: &Config) -> PathBuf {
    config
        .storage
        .data_dir
        .clone()
        .filter(|d| !d.as_os_str().is_empty())
        .or_else(|| dirs::home_dir().map(|h| h.join(".relay").join("data")))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Load config from the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Engine settings resolved from config: everything the session registry needs at runtime.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub default_endpoint: String,
    pub reconnect_delay: Duration,
    pub deletion_grace: Duration,
    pub credentials_dir: PathBuf,
    pub session_config_dir: PathBuf,
    pub media_dir: PathBuf,
    pub unclassified_log: PathBuf,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self::with_data_dir(resolve_data_dir(config));
        settings.default_endpoint = config.relay.default_endpoint.trim().to_string();
        settings.reconnect_delay = Duration::from_millis(config.relay.reconnect_delay_ms);
        settings.deletion_grace = Duration::from_millis(config.relay.deletion_grace_ms);
        settings
    }

    /// Defaults with every path placed under `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            default_endpoint: default_relay_endpoint(),
            reconnect_delay: Duration::from_millis(default_reconnect_delay_ms()),
            deletion_grace: Duration::from_millis(default_deletion_grace_ms()),
            credentials_dir: data_dir.join("credentials"),
            session_config_dir: data_dir.join("sessions"),
            media_dir: data_dir.join("media"),
            unclassified_log: data_dir.join("unclassified.jsonl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3002);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn relay_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.relay.reconnect_delay_ms, 2000);
        assert_eq!(config.relay.deletion_grace_ms, 5000);
        assert!(config.relay.default_endpoint.ends_with("/whatsapp/webhook"));
    }

    #[test]
    fn partial_relay_section_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"relay":{"reconnectDelayMs":250}}"#).unwrap();
        assert_eq!(config.relay.reconnect_delay_ms, 250);
        assert_eq!(config.relay.deletion_grace_ms, 5000);
    }

    #[test]
    fn settings_place_state_under_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = Some(PathBuf::from("/srv/relay"));
        config.relay.deletion_grace_ms = 10;
        let s = RelaySettings::from_config(&config);
        assert_eq!(s.credentials_dir, PathBuf::from("/srv/relay/credentials"));
        assert_eq!(s.session_config_dir, PathBuf::from("/srv/relay/sessions"));
        assert_eq!(s.media_dir, PathBuf::from("/srv/relay/media"));
        assert_eq!(s.unclassified_log, PathBuf::from("/srv/relay/unclassified.jsonl"));
        assert_eq!(s.deletion_grace, Duration::from_millis(10));
    }

    #[test]
    fn loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }
}
