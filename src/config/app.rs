//! Combined configuration file: scheduler tuning plus beam tool paths.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{BeamConfig, SchedulerConfig};

/// Root configuration as read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheduler tuning.
    pub scheduler: SchedulerConfig,
    /// External tool paths.
    pub beam: BeamConfig,
}

impl AppConfig {
    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// The first invalid field, prefixed by its section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        self.beam.validate().map_err(|e| format!("beam: {e}"))
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` when given (defaults otherwise), then apply `PBCOR_*`
    /// environment overrides to the scheduler section.
    ///
    /// # Errors
    ///
    /// Unreadable file, parse or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                Self::from_json_str(&raw)?
            }
            None => Self::default(),
        };
        cfg.scheduler = cfg.scheduler.with_env_overrides()?;
        Ok(cfg)
    }
}
