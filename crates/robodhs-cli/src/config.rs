//! Bridge configuration – `~/.robodhs/config.toml`, `ROBODHS_*` environment
//! overrides and command-line flags, in increasing precedence.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use robodhs_runtime::{BridgeConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DCSS host to connect to.
    pub dcss_host: String,
    /// DCSS hardware-server port.
    pub dcss_port: u16,
    /// Name announced in `htos_client_is_hardware`.
    pub hardware_name: String,
    /// WebSocket URL of the robot-control service.
    pub robot_url: String,
    pub heartbeat_interval_ms: u64,
    /// Silence from DCSS longer than this ends the session.
    pub peer_timeout_ms: u64,
    pub operation_timeout_secs: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
    /// Exit (code 3) instead of reconnecting when the DCSS byte stream is
    /// corrupt.
    pub exit_on_framing_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dcss_host: "localhost".to_string(),
            dcss_port: 14242,
            hardware_name: "robot".to_string(),
            robot_url: "ws://localhost:9090".to_string(),
            heartbeat_interval_ms: 5_000,
            peer_timeout_ms: 30_000,
            operation_timeout_secs: 600,
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 5_000,
            shutdown_grace_secs: 10,
            exit_on_framing_error: true,
        }
    }
}

impl Config {
    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.dcss_host.trim().is_empty() {
            return invalid("dcss_host must not be empty".into());
        }
        if self.dcss_port == 0 {
            return invalid("dcss_port must not be 0".into());
        }
        if self.hardware_name.trim().is_empty() || self.hardware_name.contains(char::is_whitespace)
        {
            return invalid(format!(
                "hardware_name {:?} must be a single non-empty word",
                self.hardware_name
            ));
        }
        if !(self.robot_url.starts_with("ws://") || self.robot_url.starts_with("wss://")) {
            return invalid(format!("robot_url {:?} must be a ws:// or wss:// URL", self.robot_url));
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("operation_timeout_secs", self.operation_timeout_secs),
            ("reconnect_min_ms", self.reconnect_min_ms),
            ("reconnect_max_ms", self.reconnect_max_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than 0"));
            }
        }
        if self.reconnect_min_ms > self.reconnect_max_ms {
            return invalid(format!(
                "reconnect_min_ms ({}) exceeds reconnect_max_ms ({})",
                self.reconnect_min_ms, self.reconnect_max_ms
            ));
        }
        if self.heartbeat_interval_ms >= self.peer_timeout_ms {
            return invalid(format!(
                "heartbeat_interval_ms ({}) must be below peer_timeout_ms ({})",
                self.heartbeat_interval_ms, self.peer_timeout_ms
            ));
        }
        Ok(())
    }

    /// Apply a `--dcss` value: `host` or `host:port`.
    pub fn set_dcss(&mut self, value: &str) -> Result<(), ConfigError> {
        match value.rsplit_once(':') {
            Some((host, port)) => {
                self.dcss_port = port
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("bad DCSS port in {value:?}")))?;
                self.dcss_host = host.to_string();
            }
            None => self.dcss_host = value.to_string(),
        }
        Ok(())
    }

    pub fn reconnect_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reconnect_min_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        let (reconnect_min, reconnect_max) = self.reconnect_bounds();
        BridgeConfig {
            session: SessionConfig {
                dcss_host: self.dcss_host.clone(),
                dcss_port: self.dcss_port,
                hardware_name: self.hardware_name.clone(),
                heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
                peer_timeout: Duration::from_millis(self.peer_timeout_ms),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                reconnect_min,
                reconnect_max,
                exit_on_framing_error: self.exit_on_framing_error,
            },
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Return the path to `~/.robodhs/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".robodhs").join("config.toml")
}

/// Load configuration from `explicit`, or from the default path.
///
/// A missing default file yields the defaults; a missing explicit file is an
/// error.  Environment overrides are applied in both cases.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = match explicit {
        Some(path) => read(path)?,
        None => {
            let path = config_path();
            if path.exists() {
                read(&path)?
            } else {
                Config::default()
            }
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub(crate) fn read(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `ROBODHS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROBODHS_DCSS_HOST` | `dcss_host` |
/// | `ROBODHS_DCSS_PORT` | `dcss_port` |
/// | `ROBODHS_HARDWARE_NAME` | `hardware_name` |
/// | `ROBODHS_ROBOT_URL` | `robot_url` |
/// | `ROBODHS_HEARTBEAT_INTERVAL_MS` | `heartbeat_interval_ms` |
/// | `ROBODHS_PEER_TIMEOUT_MS` | `peer_timeout_ms` |
/// | `ROBODHS_OPERATION_TIMEOUT_SECS` | `operation_timeout_secs` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROBODHS_DCSS_HOST") {
        cfg.dcss_host = v;
    }
    if let Ok(v) = std::env::var("ROBODHS_DCSS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.dcss_port = port;
    }
    if let Ok(v) = std::env::var("ROBODHS_HARDWARE_NAME") {
        cfg.hardware_name = v;
    }
    if let Ok(v) = std::env::var("ROBODHS_ROBOT_URL") {
        cfg.robot_url = v;
    }
    if let Ok(v) = std::env::var("ROBODHS_HEARTBEAT_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.heartbeat_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("ROBODHS_PEER_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.peer_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("ROBODHS_OPERATION_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.operation_timeout_secs = secs;
    }
}
