// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Ticks per second the login supervisor assumes when running at normal speed.
pub const BASE_TICK_RATE: u32 = 20;
pub const MIN_SPEED_MULTIPLIER: f64 = 0.01;
pub const MAX_SPEED_MULTIPLIER: f64 = 100.0;
/// Bounds on the scaled tick period. A zero period would stall the tick timer.
pub const MIN_TICK_DURATION: Duration = Duration::from_millis(1);
pub const MAX_TICK_DURATION: Duration = Duration::from_secs(100);

/// Settings for the server-list status document.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusConfig {
    /// The message of the day shown in the server list.
    #[serde(default = "default_motd")]
    pub motd: String,
    /// The advertised player cap. Also enforced at the login handoff.
    #[serde(default = "default_max_players")]
    pub max_players: i32,
    /// Path to a 64x64 PNG served as the server icon.
    #[serde(default)]
    pub favicon_path: Option<String>,
    /// How many online players are listed in the hover sample.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            motd: default_motd(),
            max_players: default_max_players(),
            favicon_path: None,
            sample_size: default_sample_size(),
        }
    }
}

fn default_motd() -> String {
    "A Worldgate Server".to_string()
}
fn default_max_players() -> i32 {
    20
}
fn default_sample_size() -> usize {
    12
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9225
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_online_mode")]
    online_mode: bool,
    #[serde(default)]
    prevent_proxy_connections: bool,
    #[serde(default = "default_compression_threshold")]
    compression_threshold: i32,
    #[serde(default = "default_connection_throttle_ms")]
    connection_throttle_ms: u64,
    #[serde(default = "default_login_timeout_ticks")]
    login_timeout_ticks: u32,
    #[serde(default = "default_tick_rate")]
    tick_rate: u32,
    #[serde(default = "default_speed_multiplier")]
    speed_multiplier: f64,
    #[serde(default = "default_key_bits")]
    key_bits: usize,
    #[serde(default = "default_session_server")]
    session_server: String,
    #[serde(default)]
    status: StatusConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    25565
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    1024
}
fn default_online_mode() -> bool {
    true
}
fn default_compression_threshold() -> i32 {
    256
}
fn default_connection_throttle_ms() -> u64 {
    4000
}
fn default_login_timeout_ticks() -> u32 {
    600 // 30 seconds at 20 TPS
}
fn default_tick_rate() -> u32 {
    BASE_TICK_RATE
}
fn default_speed_multiplier() -> f64 {
    1.0
}
fn default_key_bits() -> usize {
    1024
}
fn default_session_server() -> String {
    "https://sessionserver.mojang.com".to_string()
}

/// The validated server configuration. Read-only once the server is running.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    /// Secure mode: key exchange plus verification against the session server.
    pub online_mode: bool,
    /// Forward the client's address to the session server so proxied joins fail.
    pub prevent_proxy_connections: bool,
    /// `-1` disables compression; otherwise the byte cutoff for compressed framing.
    pub compression_threshold: i32,
    /// Minimum spacing between login attempts from one address. `0` disables throttling.
    pub connection_throttle_ms: u64,
    pub login_timeout_ticks: u32,
    pub tick_rate: u32,
    pub speed_multiplier: f64,
    pub key_bits: usize,
    pub session_server: String,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            online_mode: default_online_mode(),
            prevent_proxy_connections: false,
            compression_threshold: default_compression_threshold(),
            connection_throttle_ms: default_connection_throttle_ms(),
            login_timeout_ticks: default_login_timeout_ticks(),
            tick_rate: default_tick_rate(),
            speed_multiplier: default_speed_multiplier(),
            key_bits: default_key_bits(),
            session_server: default_session_server(),
            status: StatusConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            max_clients: raw.max_clients,
            online_mode: raw.online_mode,
            prevent_proxy_connections: raw.prevent_proxy_connections,
            compression_threshold: raw.compression_threshold,
            connection_throttle_ms: raw.connection_throttle_ms,
            login_timeout_ticks: raw.login_timeout_ticks,
            tick_rate: raw.tick_rate,
            speed_multiplier: raw.speed_multiplier,
            key_bits: raw.key_bits,
            session_server: raw.session_server,
            status: raw.status,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.tick_rate == 0 {
            return Err(anyhow!("tick_rate cannot be 0"));
        }
        if !(MIN_SPEED_MULTIPLIER..=MAX_SPEED_MULTIPLIER).contains(&self.speed_multiplier) {
            return Err(anyhow!(
                "speed_multiplier must be between {} and {}, got {}",
                MIN_SPEED_MULTIPLIER,
                MAX_SPEED_MULTIPLIER,
                self.speed_multiplier
            ));
        }
        if self.tick_rate as f64 * self.speed_multiplier > 1000.0 {
            return Err(anyhow!(
                "tick_rate {} at speed_multiplier {} would tick more than once per millisecond",
                self.tick_rate,
                self.speed_multiplier
            ));
        }
        if self.compression_threshold < -1 {
            return Err(anyhow!(
                "compression_threshold must be -1 (disabled) or non-negative, got {}",
                self.compression_threshold
            ));
        }
        if self.key_bits < 512 {
            return Err(anyhow!("key_bits must be at least 512, got {}", self.key_bits));
        }
        if self.status.max_players < 0 {
            return Err(anyhow!("status.max_players cannot be negative"));
        }
        if self.online_mode && self.session_server.trim().is_empty() {
            return Err(anyhow!(
                "session_server cannot be empty when online_mode is enabled"
            ));
        }

        if !self.online_mode {
            warn!(
                "online_mode is disabled. Player names are not verified and anyone may join under any name."
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }

    /// The compression threshold, or `None` when compression is disabled.
    pub fn compression(&self) -> Option<usize> {
        usize::try_from(self.compression_threshold).ok()
    }

    /// The throttle window, or `None` when throttling is disabled.
    pub fn throttle_window(&self) -> Option<Duration> {
        (self.connection_throttle_ms > 0).then(|| Duration::from_millis(self.connection_throttle_ms))
    }

    /// Wall-clock length of one tick, shortened or stretched by the speed multiplier.
    pub fn tick_duration(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / (self.tick_rate as f64 * self.speed_multiplier))
            .unwrap_or(MAX_TICK_DURATION)
            .clamp(MIN_TICK_DURATION, MAX_TICK_DURATION)
    }

    /// The login timeout in ticks, scaled by the speed multiplier so the wall-clock
    /// allowance stays the same at any simulation speed.
    pub fn effective_login_timeout_ticks(&self) -> u64 {
        (self.login_timeout_ticks as f64 * self.speed_multiplier).round() as u64
    }
}
