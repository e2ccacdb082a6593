//! Paths of the external beam-correction tool and its data files.

use serde::{Deserialize, Serialize};

/// External tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Python interpreter.
    pub python: String,
    /// Correction script.
    pub script: String,
    /// Embedded element beam pattern file.
    pub beam_pattern_file: String,
    /// Sweet-spot delay table.
    pub sweetspot_file: String,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            script: "mwapb.py".into(),
            beam_pattern_file: "mwa_full_embedded_element_pattern.h5".into(),
            sweetspot_file: "MWA_sweet_spots.npy".into(),
        }
    }
}

impl BeamConfig {
    /// Validate that no path is empty.
    ///
    /// # Errors
    ///
    /// Names the first empty field.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("python", &self.python),
            ("script", &self.script),
            ("beam_pattern_file", &self.beam_pattern_file),
            ("sweetspot_file", &self.sweetspot_file),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} must not be empty"));
            }
        }
        Ok(())
    }
}
