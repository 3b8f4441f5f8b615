use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::router::RouterConfig;
use crate::subsystems::{LidarConfig, LinkGuardConfig};
use crate::telemetry::TelemetryConfig;

/// Base tick of every cyclic entry point.
pub const CYCLE_PERIOD_MS: u16 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("lidar zones out of order: emergency {emergency} <= brake {brake} <= warn {warn} required")]
    ZoneOrder { emergency: u16, brake: u16, warn: u16 },
    #[error("lidar range {min}..={max} is empty")]
    EmptyRange { min: u16, max: u16 },
    #[error("{0} must be non-zero")]
    ZeroPeriod(&'static str),
}

/// Complete controller configuration. Missing fields take production defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FzcConfig {
    pub lidar: LidarConfig,
    pub link: LinkGuardConfig,
    pub router: RouterConfig,
    pub telemetry: TelemetryConfig,
}

impl FzcConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lidar = &self.lidar;
        if !(lidar.emergency_cm <= lidar.brake_cm && lidar.brake_cm <= lidar.warn_cm) {
            return Err(ConfigError::ZoneOrder {
                emergency: lidar.emergency_cm,
                brake: lidar.brake_cm,
                warn: lidar.warn_cm,
            });
        }
        if lidar.range_min_cm > lidar.range_max_cm {
            return Err(ConfigError::EmptyRange {
                min: lidar.range_min_cm,
                max: lidar.range_max_cm,
            });
        }
        if lidar.timeout_ms == 0 {
            return Err(ConfigError::ZeroPeriod("lidar.timeout_ms"));
        }
        if lidar.stuck_cycles == 0 {
            return Err(ConfigError::ZeroPeriod("lidar.stuck_cycles"));
        }
        if self.link.silence_ms == 0 {
            return Err(ConfigError::ZeroPeriod("link.silence_ms"));
        }
        if self.link.error_warning_cycles == 0 {
            return Err(ConfigError::ZeroPeriod("link.error_warning_cycles"));
        }
        if self.router.heartbeat_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod("router.heartbeat_period_ms"));
        }
        if self.telemetry.period_cycles == 0 {
            return Err(ConfigError::ZeroPeriod("telemetry.period_cycles"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FzcConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = FzcConfig::from_json_str(r#"{ "lidar": { "warn_cm": 150 } }"#).unwrap();
        assert_eq!(config.lidar.warn_cm, 150);
        assert_eq!(config.lidar.brake_cm, 50);
        assert_eq!(config.link.silence_ms, 200);
    }

    #[test]
    fn rejects_inverted_zones() {
        let err = FzcConfig::from_json_str(r#"{ "lidar": { "brake_cm": 200 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZoneOrder { brake: 200, .. }));
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let err =
            FzcConfig::from_json_str(r#"{ "router": { "heartbeat_period_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod("router.heartbeat_period_ms")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            FzcConfig::from_json_str("{ lidar"),
            Err(ConfigError::Parse(_))
        ));
    }
}
