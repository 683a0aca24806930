//! Configuration for the collective orchestrator.
//!
//! Every tunable constant of the protocol lives here with its default. A
//! config file only needs to name the values it overrides:
//!
//! ```toml
//! [scheduler]
//! min_fit_score = 0.4
//!
//! [server]
//! port = 8080
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// How many generations of responses a message may trigger. Agent
    /// directives (votes, claims) travel as responses, so this is at least 1.
    pub max_fanout_depth: usize,
    /// Bounded wait for an agent's reply, in milliseconds
    pub response_timeout_ms: u64,
    /// Capacity of each agent's inbound mailbox
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_fanout_depth: 1,
            response_timeout_ms: 5_000,
            mailbox_capacity: 64,
        }
    }
}

impl BusConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Consensus engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Threshold used when a proposal does not carry one
    pub default_threshold: f64,
    /// Voting window used when a proposal does not carry a deadline, in seconds
    pub default_voting_window_secs: u64,
    /// Threshold for proposals raised by the health monitor
    pub isolation_threshold: f64,
    /// Voting window for proposals raised by the health monitor, in seconds
    pub isolation_deadline_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.6,
            default_voting_window_secs: 300,
            isolation_threshold: 0.6,
            isolation_deadline_secs: 300,
        }
    }
}

/// Task scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fit score an agent must exceed to be a candidate
    pub min_fit_score: f64,
    /// Maximum agents assigned to one task
    pub max_assignees: usize,
    /// Priority of task assignment messages
    pub assignment_priority: u8,
    /// Priority of emergency broadcasts
    pub emergency_priority: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_fit_score: 0.3,
            max_assignees: 3,
            assignment_priority: 3,
            emergency_priority: 5,
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Agents below this trust score are flagged
    pub trust_floor: f64,
    /// Agents below this success rate are flagged
    pub success_floor: f64,
    /// Multiplier applied to trust when the success rate is below the floor
    pub trust_decay: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            trust_floor: 0.3,
            success_floor: 0.2,
            trust_decay: 0.8,
        }
    }
}

/// Seeds for dynamically created specialists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialistConfig {
    pub proficiency: f64,
    pub trust: f64,
    /// Subtracted from the trained trust when created by the emergency protocol
    pub emergency_trust_penalty: f64,
    pub learning_rate: f64,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            proficiency: 0.8,
            trust: 0.7,
            emergency_trust_penalty: 0.1,
            learning_rate: 0.1,
        }
    }
}

/// Emergent-behaviour observation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergenceConfig {
    pub observation_window_ms: u64,
}

impl Default for EmergenceConfig {
    fn default() -> Self {
        Self {
            observation_window_ms: 2_000,
        }
    }
}

impl EmergenceConfig {
    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.observation_window_ms)
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectiveConfig {
    pub bus: BusConfig,
    pub consensus: ConsensusConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub specialist: SpecialistConfig,
    pub emergence: EmergenceConfig,
    pub server: ServerConfig,
}

impl CollectiveConfig {
    /// Default config file location (`<config dir>/collective/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "collective").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )))
            }
        };

        unit("consensus.default_threshold", self.consensus.default_threshold)?;
        unit("consensus.isolation_threshold", self.consensus.isolation_threshold)?;
        unit("scheduler.min_fit_score", self.scheduler.min_fit_score)?;
        unit("health.trust_floor", self.health.trust_floor)?;
        unit("health.success_floor", self.health.success_floor)?;
        unit("health.trust_decay", self.health.trust_decay)?;
        unit("specialist.proficiency", self.specialist.proficiency)?;
        unit("specialist.trust", self.specialist.trust)?;
        unit(
            "specialist.emergency_trust_penalty",
            self.specialist.emergency_trust_penalty,
        )?;
        unit("specialist.learning_rate", self.specialist.learning_rate)?;

        if self.scheduler.max_assignees == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_assignees must be at least 1".to_string(),
            ));
        }
        for (name, priority) in [
            ("scheduler.assignment_priority", self.scheduler.assignment_priority),
            ("scheduler.emergency_priority", self.scheduler.emergency_priority),
        ] {
            if !(1..=5).contains(&priority) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [1, 5], got {}",
                    name, priority
                )));
            }
        }
        if self.bus.max_fanout_depth == 0 {
            return Err(ConfigError::Invalid(
                "bus.max_fanout_depth must be at least 1".to_string(),
            ));
        }
        if self.bus.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.mailbox_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
