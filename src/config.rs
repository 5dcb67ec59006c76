use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which firmware family sits on the other end of the wire. Both share the
/// `<...>` status skeleton; they differ in welcome banner and feedback
/// message conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Grbl,
    FluidNc,
}

/// Display preference only; the wire is always millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Millimeters,
    Inches,
}

impl Units {
    pub fn from_millimeters(self, value: f64) -> f64 {
        match self {
            Units::Millimeters => value,
            Units::Inches => value / 25.4,
        }
    }
    pub fn suffix(self) -> &'static str {
        match self {
            Units::Millimeters => "mm",
            Units::Inches => "in",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Size of the firmware's serial receive buffer in bytes.
    pub buffer_capacity: usize,
    pub status_poll_interval_ms: u64,
    pub dialect: Dialect,
    pub units: Units,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        StreamerConfig {
            buffer_capacity: 127,
            status_poll_interval_ms: 200,
            dialect: Dialect::FluidNc,
            units: Units::Millimeters,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Format(#[from] serde_json::Error),
}

impl StreamerConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: StreamerConfig = serde_json::from_str(r#"{"dialect": "grbl"}"#).unwrap();
        assert_eq!(config.dialect, Dialect::Grbl);
        assert_eq!(config.buffer_capacity, 127);
        assert_eq!(config.status_poll_interval_ms, 200);
    }

    #[test]
    fn unit_conversion() {
        assert_eq!(Units::Inches.from_millimeters(25.4), 1.0);
        assert_eq!(Units::Millimeters.from_millimeters(25.4), 25.4);
    }
}
