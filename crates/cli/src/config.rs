//! Configuration loading from warden.toml.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use broker::BrokerSettings;
use policy::{ActionKind, Policy, Secret};
use serde::Deserialize;

pub const SECRET_VAR: &str = "WARDEN_SECRET";
pub const DESTINATIONS_VAR: &str = "WARDEN_ALLOWED_DESTINATIONS";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Policy preset tables.
    #[serde(flatten)]
    pub policy: Policy,
}

/// The `[broker]` table.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// HMAC key for capability signatures. Prefer `WARDEN_SECRET`.
    pub secret: Option<String>,

    /// Destinations wallet/ledger-scoped transfers may reach.
    pub allowed_destinations: Vec<String>,

    pub provider_timeout_secs: u64,

    pub rate_window_secs: u64,

    /// Per-kind rate limits keyed by kind name, e.g. `LOG = 120`.
    pub rate_limits: BTreeMap<String, u32>,

    /// Root directory the file provider is confined to.
    pub sandbox_root: PathBuf,

    /// Commands the process provider may spawn. `"*"` allows any.
    pub allowed_commands: Vec<String>,

    pub anchor_label: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            secret: None,
            allowed_destinations: Vec::new(),
            provider_timeout_secs: 30,
            rate_window_secs: 60,
            rate_limits: BTreeMap::new(),
            sandbox_root: PathBuf::from("sandbox"),
            allowed_commands: Vec::new(),
            anchor_label: "warden".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config
            .policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied either way.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `WARDEN_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(SECRET_VAR) {
            self.broker.secret = Some(secret);
        }
        if let Some(destinations) = lookup(DESTINATIONS_VAR) {
            self.broker.allowed_destinations = destinations
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// The capability signing secret.
    ///
    /// Requires a non-empty `broker.secret` or `WARDEN_SECRET`.
    pub fn secret(&self) -> Result<Secret, ConfigError> {
        match self.broker.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(Secret::from(secret)),
            _ => Err(ConfigError::MissingSecret),
        }
    }

    pub fn settings(&self) -> Result<BrokerSettings, ConfigError> {
        let mut rate_limits = BTreeMap::new();
        for (name, limit) in &self.broker.rate_limits {
            let kind = ActionKind::ALL
                .into_iter()
                .find(|k| k.as_str() == name.as_str())
                .ok_or_else(|| ConfigError::Invalid(format!("unknown action kind '{name}'")))?;
            rate_limits.insert(kind, *limit);
        }
        if self.broker.rate_window_secs == 0 {
            return Err(ConfigError::Invalid("rate_window_secs must be positive".into()));
        }
        Ok(BrokerSettings {
            allowed_destinations: self.broker.allowed_destinations.clone(),
            provider_timeout: Duration::from_secs(self.broker.provider_timeout_secs),
            rate_window: Duration::from_secs(self.broker.rate_window_secs),
            rate_limits,
            anchor_label: self.broker.anchor_label.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("capability secret not configured: set broker.secret or {SECRET_VAR}")]
    MissingSecret,

    #[error("invalid config: {0}")]
    Invalid(String),
}
