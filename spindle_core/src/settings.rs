//! Run configuration and its flat-file persistence.
//!
//! The settings file is one `key: value` pair per line (a plain YAML
//! mapping). Unknown keys are ignored, a value that does not parse as a
//! number leaves that key at its default, and a missing file leaves every
//! default in place.

use crate::error::{SpindleError, SpindleResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Configuration for one fastening run. Immutable while the loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlSettings {
    /// Torque threshold that ends the run [Nm].
    pub target_torque_nm: f64,
    /// Angle threshold that ends the run [deg].
    pub max_angle_deg: f64,
    /// Control loop frequency [Hz]. Must be positive.
    pub cycle_hz: f64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            target_torque_nm: 5.0,
            max_angle_deg: 360.0,
            cycle_hz: 200.0,
        }
    }
}

impl ControlSettings {
    /// Load settings from a file, falling back to defaults per key.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut settings = Self::default();

        let text = match fs::read_to_string(path.as_ref()) {
            Ok(text) => text,
            Err(_) => return settings,
        };
        let doc: serde_yaml::Value = match serde_yaml::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.as_ref().display(), "unreadable settings file: {e}");
                return settings;
            }
        };

        if let Some(v) = doc.get("targetTorqueNm").and_then(serde_yaml::Value::as_f64) {
            settings.target_torque_nm = v;
        }
        if let Some(v) = doc.get("maxAngleDeg").and_then(serde_yaml::Value::as_f64) {
            settings.max_angle_deg = v;
        }
        if let Some(v) = doc.get("cycleHz").and_then(serde_yaml::Value::as_f64) {
            settings.cycle_hz = v;
        }
        settings
    }

    /// Write settings to a file in the same `key: value` format.
    pub fn save(&self, path: impl AsRef<Path>) -> SpindleResult<()> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| SpindleError::config(format!("failed to serialize settings: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Check the invariants the control loop relies on.
    pub fn validate(&self) -> SpindleResult<()> {
        if !(self.cycle_hz.is_finite() && self.cycle_hz > 0.0) {
            return Err(SpindleError::config(format!(
                "cycleHz must be a positive finite value, got {}",
                self.cycle_hz
            )));
        }
        if !self.target_torque_nm.is_finite() || !self.max_angle_deg.is_finite() {
            return Err(SpindleError::config(
                "targetTorqueNm and maxAngleDeg must be finite",
            ));
        }
        Ok(())
    }
}
