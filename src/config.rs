//! Configuration management
//!
//! This module handles loading configuration from TOML files. Every section
//! and field is optional; anything missing falls back to the router's stock
//! behaviour. Command-line flags are applied on top by `main`.

use crate::http::TransportSettings;
use crate::poll::PollPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Router address and login
    #[serde(default)]
    pub device: DeviceConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// On-device ping test
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Reboot recovery budgets
    #[serde(default)]
    pub reboot: RebootConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Use HTTPS (self-signed certificates accepted)
    #[serde(default)]
    pub https: bool,

    /// Full login handshakes to attempt before giving up
    #[serde(default = "default_login_retry")]
    pub retry: u32,

    /// Per-request timeout for login POSTs, in seconds
    #[serde(default = "default_login_timeout")]
    pub login_timeout: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            https: false,
            retry: default_login_retry(),
            login_timeout: default_login_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Attempts for read-only requests
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    /// Address pinged by the reachability check (the router only accepts IPs)
    #[serde(default = "default_target")]
    pub target: String,

    /// A test passes when packet loss is strictly below this percentage
    #[serde(default = "default_loss_threshold")]
    pub loss_threshold: u32,

    #[serde(default = "default_probe_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            loss_threshold: default_loss_threshold(),
            poll_attempts: default_probe_attempts(),
            poll_interval_ms: default_interval_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_attempts, Duration::from_millis(self.poll_interval_ms))
    }
}

/// Which recovery sequence to run after a reboot
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Wait for DOCSIS registration and the GRE tunnel before pinging
    #[default]
    Full,
    /// Go straight from reconnect to ping tests
    Basic,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RebootConfig {
    #[serde(default)]
    pub mode: RecoveryMode,

    /// Login probes shared by the downtime and reconnect phases
    #[serde(default = "default_reconnect_budget")]
    pub reconnect_budget: u32,

    /// Give up if the router still accepts logins after this many probes
    #[serde(default = "default_abort_after")]
    pub abort_after: u32,

    #[serde(default = "default_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Pause after the router first drops off, before probing again
    #[serde(default = "default_boot_grace")]
    pub boot_grace_secs: u64,

    #[serde(default = "default_registration_budget")]
    pub registration_budget: u32,

    #[serde(default = "default_interval_ms")]
    pub registration_interval_ms: u64,

    #[serde(default = "default_tunnel_budget")]
    pub tunnel_budget: u32,

    #[serde(default = "default_interval_ms")]
    pub tunnel_interval_ms: u64,

    /// Ping tests before declaring a line fault
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Record repeated poll results, not just phase changes
    #[serde(default = "default_narrate")]
    pub narrate: bool,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::default(),
            reconnect_budget: default_reconnect_budget(),
            abort_after: default_abort_after(),
            reconnect_interval_ms: default_interval_ms(),
            boot_grace_secs: default_boot_grace(),
            registration_budget: default_registration_budget(),
            registration_interval_ms: default_interval_ms(),
            tunnel_budget: default_tunnel_budget(),
            tunnel_interval_ms: default_interval_ms(),
            verify_attempts: default_verify_attempts(),
            narrate: default_narrate(),
        }
    }
}

impl RebootConfig {
    pub fn reconnect_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.reconnect_budget,
            Duration::from_millis(self.reconnect_interval_ms),
        )
    }

    pub fn registration_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.registration_budget,
            Duration::from_millis(self.registration_interval_ms),
        )
    }

    pub fn tunnel_policy(&self) -> PollPolicy {
        PollPolicy::new(self.tunnel_budget, Duration::from_millis(self.tunnel_interval_ms))
    }

    /// Each attempt is already paced by the probe's own polling
    pub fn verify_policy(&self) -> PollPolicy {
        PollPolicy::new(self.verify_attempts, Duration::ZERO)
    }

    pub fn boot_grace(&self) -> Duration {
        Duration::from_secs(self.boot_grace_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_login_retry() -> u32 {
    2
}

fn default_login_timeout() -> u64 {
    3
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_target() -> String {
    "8.8.8.8".to_string()
}

fn default_loss_threshold() -> u32 {
    30
}

fn default_probe_attempts() -> u32 {
    8
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_reconnect_budget() -> u32 {
    100
}

fn default_abort_after() -> u32 {
    50
}

fn default_boot_grace() -> u64 {
    120
}

fn default_registration_budget() -> u32 {
    100
}

fn default_tunnel_budget() -> u32 {
    200
}

fn default_verify_attempts() -> u32 {
    30
}

fn default_narrate() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `explicit`, else the first file found on the
    /// search path, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = vec![
            PathBuf::from("hitron.toml"),
            PathBuf::from("/etc/hitron/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/hitron/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                return Self::from_file(path);
            }
        }

        // No config file found, use defaults
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            host: self.device.host.clone(),
            https: self.device.https,
            timeout: Duration::from_secs(self.http.timeout),
            connect_timeout: Duration::from_secs(self.http.connect_timeout),
            max_retries: self.http.max_retries,
        }
    }
}
