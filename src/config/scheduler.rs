//! Scheduler tuning: resource floors, polling cadence, launch mode.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{LaunchMode, Thresholds, TrackerSettings};

/// Prefix of environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "PBCOR_";

/// Scheduler configuration.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum idle CPU percentage before another job may start.
    pub cpu_floor_pct: f64,
    /// Minimum available memory percentage before another job may start.
    pub mem_floor_pct: f64,
    /// Pause before the first poll of each wait, in milliseconds.
    pub initial_delay_ms: u64,
    /// Poll interval while waiting, in milliseconds.
    pub poll_interval_ms: u64,
    /// Give up waiting for a slot after this many seconds. `None` waits forever.
    pub slot_timeout_secs: Option<u64>,
    /// Estimated job memory as a multiple of the input file size.
    pub footprint_multiplier: f64,
    /// How job processes are started.
    pub launch_mode: LaunchMode,
    /// Extra attempts for a failed marker directory listing.
    pub marker_scan_retries: usize,
    /// CPU sampling window of the system monitor, in milliseconds.
    pub cpu_sample_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_floor_pct: 20.0,
            mem_floor_pct: 20.0,
            initial_delay_ms: 5000,
            poll_interval_ms: 1000,
            slot_timeout_secs: None,
            footprint_multiplier: crate::core::planner::DEFAULT_FOOTPRINT_MULTIPLIER,
            launch_mode: LaunchMode::Supervised,
            marker_scan_retries: 3,
            cpu_sample_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        for (name, pct) in [("cpu_floor_pct", self.cpu_floor_pct), ("mem_floor_pct", self.mem_floor_pct)] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(format!("{name} must be within 0..=100, got {pct}"));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.slot_timeout_secs == Some(0) {
            return Err("slot_timeout_secs must be greater than 0 when set".into());
        }
        if !self.footprint_multiplier.is_finite() || self.footprint_multiplier <= 0.0 {
            return Err("footprint_multiplier must be a positive number".into());
        }
        if self.cpu_sample_ms == 0 {
            return Err("cpu_sample_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `PBCOR_*` environment variables.
    ///
    /// Loads a `.env` file first when one is present.
    ///
    /// # Errors
    ///
    /// A variable that does not parse, or a validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::default().with_env_overrides()
    }

    /// Apply `PBCOR_*` environment overrides on top of `self`.
    ///
    /// # Errors
    ///
    /// A variable that does not parse, or a validation failure.
    pub fn with_env_overrides(mut self) -> Result<Self, String> {
        override_from_env("CPU_FLOOR_PCT", &mut self.cpu_floor_pct)?;
        override_from_env("MEM_FLOOR_PCT", &mut self.mem_floor_pct)?;
        override_from_env("INITIAL_DELAY_MS", &mut self.initial_delay_ms)?;
        override_from_env("POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        override_from_env("FOOTPRINT_MULTIPLIER", &mut self.footprint_multiplier)?;
        override_from_env("MARKER_SCAN_RETRIES", &mut self.marker_scan_retries)?;
        override_from_env("CPU_SAMPLE_MS", &mut self.cpu_sample_ms)?;
        if let Some(secs) = env_var("SLOT_TIMEOUT_SECS") {
            self.slot_timeout_secs = Some(parse_var("SLOT_TIMEOUT_SECS", &secs)?);
        }
        if let Some(mode) = env_var("LAUNCH_MODE") {
            self.launch_mode = match mode.to_ascii_lowercase().as_str() {
                "supervised" => LaunchMode::Supervised,
                "detached" => LaunchMode::Detached,
                other => return Err(format!("{ENV_PREFIX}LAUNCH_MODE: unknown mode `{other}`")),
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Resource floors as [`Thresholds`].
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        Thresholds {
            cpu_floor_pct: self.cpu_floor_pct,
            mem_floor_pct: self.mem_floor_pct,
        }
    }

    /// Polling behaviour as [`TrackerSettings`].
    #[must_use]
    pub const fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            marker_scan_retries: self.marker_scan_retries,
            thresholds: self.thresholds(),
        }
    }

    /// Slot timeout as a [`Duration`].
    #[must_use]
    pub fn slot_timeout(&self) -> Option<Duration> {
        self.slot_timeout_secs.map(Duration::from_secs)
    }

    /// CPU sampling window as a [`Duration`].
    #[must_use]
    pub const fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn parse_var<T: FromStr>(suffix: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{suffix}: {e}"))
}

fn override_from_env<T: FromStr>(suffix: &str, slot: &mut T) -> Result<(), String>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_var(suffix) {
        *slot = parse_var(suffix, &raw)?;
    }
    Ok(())
}
