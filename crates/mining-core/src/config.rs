//! Credit mining settings and the `credit_mining` TOML table.
//!
//! [`MiningConfig`] mirrors the file layout (every field optional, intervals
//! written as `"30s"` / `"10m"`); [`MiningSettings`] is the validated,
//! immutable value handed to the manager at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_TORRENTS_ACTIVE: usize = 8;
pub const DEFAULT_MAX_TORRENTS_LISTED: usize = 100;
/// Long enough for a swarm to find peers and upload before it is re-ranked.
pub const DEFAULT_AUTO_MANAGE_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_HOPS: u8 = 1;
pub const DEFAULT_DEAD_SWARM_AVAILABILITY: f64 = 1.0;

/// Top-level layout of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub credit_mining: MiningConfig,
}

/// The `[credit_mining]` table as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningConfig {
    pub max_torrents_active: Option<usize>,
    pub max_torrents_listed: Option<usize>,
    pub auto_manage_interval: Option<String>,
    pub hops: Option<u8>,
    pub save_path: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub dead_swarm_availability: Option<f64>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Immutable settings snapshot for the credit mining manager.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningSettings {
    /// Maximum number of swarms running at once.
    pub max_torrents_active: usize,
    /// Maximum number of swarms tracked by the registry.
    pub max_torrents_listed: usize,
    /// Selector re-evaluation interval.
    pub auto_manage_interval: Duration,
    /// Anonymity hops for credit mining downloads.
    pub hops: u8,
    /// Destination directory for credit mining downloads.
    pub save_path: PathBuf,
    /// Directory holding the engine's persisted download state (`*.state`).
    pub state_dir: PathBuf,
    /// Running swarms evicted with availability below this are purged.
    pub dead_swarm_availability: f64,
    /// Sources subscribed once persisted downloads have been replayed.
    pub sources: Vec<String>,
}

impl Default for MiningSettings {
    fn default() -> Self {
        Self {
            max_torrents_active: DEFAULT_MAX_TORRENTS_ACTIVE,
            max_torrents_listed: DEFAULT_MAX_TORRENTS_LISTED,
            auto_manage_interval: DEFAULT_AUTO_MANAGE_INTERVAL,
            hops: DEFAULT_HOPS,
            save_path: PathBuf::from("downloads").join("credit_mining"),
            state_dir: PathBuf::from("dlcheckpoints"),
            dead_swarm_availability: DEFAULT_DEAD_SWARM_AVAILABILITY,
            sources: Vec::new(),
        }
    }
}

impl MiningSettings {
    /// Load and validate settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.credit_mining.into_settings()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_torrents_active == 0 {
            return Err(ConfigError::Invalid {
                field: "max_torrents_active",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_torrents_listed == 0 {
            return Err(ConfigError::Invalid {
                field: "max_torrents_listed",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.auto_manage_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "auto_manage_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        if !self.dead_swarm_availability.is_finite() || self.dead_swarm_availability < 0.0 {
            return Err(ConfigError::Invalid {
                field: "dead_swarm_availability",
                reason: format!("{} is not a non-negative number", self.dead_swarm_availability),
            });
        }
        Ok(())
    }
}

impl MiningConfig {
    /// Fill in defaults and validate.
    pub fn into_settings(self) -> Result<MiningSettings, ConfigError> {
        let defaults = MiningSettings::default();
        let auto_manage_interval = match self.auto_manage_interval.as_deref() {
            Some(s) => parse_duration(s)?,
            None => defaults.auto_manage_interval,
        };

        let settings = MiningSettings {
            max_torrents_active: self.max_torrents_active.unwrap_or(defaults.max_torrents_active),
            max_torrents_listed: self.max_torrents_listed.unwrap_or(defaults.max_torrents_listed),
            auto_manage_interval,
            hops: self.hops.unwrap_or(defaults.hops),
            save_path: self.save_path.unwrap_or(defaults.save_path),
            state_dir: self.state_dir.unwrap_or(defaults.state_dir),
            dead_swarm_availability: self
                .dead_swarm_availability
                .unwrap_or(defaults.dead_swarm_availability),
            sources: self.sources,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Parse a duration string like "500ms", "30s", "10m", "1h", or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled_secs(mins, 60).ok_or_else(invalid)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled_secs(hours, 3600).ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

/// `None` on a malformed count or when the product overflows.
fn scaled_secs(count: &str, unit: u64) -> Option<Duration> {
    let count = count.trim().parse::<u64>().ok()?;
    count.checked_mul(unit).map(Duration::from_secs)
}
