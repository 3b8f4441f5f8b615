use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fault::EventId;
use crate::router::RouterStats;
use crate::safety::SafetyState;
use crate::subsystems::can_monitor::LinkGuardSnapshot;
use crate::subsystems::LidarState;

/// Upper bound of one serialized snapshot.
pub const MAX_TELEMETRY_SIZE: usize = 2048;

type TelemetryBuffer = ArrayString<MAX_TELEMETRY_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub period_cycles: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { period_cycles: 100 }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("snapshot of {len} bytes exceeds the {max} byte buffer")]
    TooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub cycle: u64,
    pub lidar: LidarState,
    pub degradation_requested: bool,
    pub link: LinkGuardSnapshot,
    pub safety: SafetyState,
    pub router: RouterStats,
    pub tx_alive: u8,
    #[serde(with = "serde_bytes")]
    pub active_dtcs: Vec<EventId>,
    #[serde(with = "serde_bytes")]
    pub last_heartbeat: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub snapshots_generated: u32,
    pub snapshots_dropped: u32,
    pub last_size_bytes: u32,
}

/// Rate-divided JSON snapshots into a fixed buffer.
#[derive(Debug)]
pub struct TelemetryCollector {
    config: TelemetryConfig,
    buffer: TelemetryBuffer,
    latest: Option<TelemetrySnapshot>,
    metrics: TelemetryMetrics,
}

impl TelemetryCollector {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            buffer: ArrayString::new(),
            latest: None,
            metrics: TelemetryMetrics::default(),
        }
    }

    pub fn should_collect(&self, cycle: u64) -> bool {
        let period = u64::from(self.config.period_cycles.max(1));
        cycle % period == 0
    }

    /// Serializes `snapshot` into the buffer and returns the JSON text.
    pub fn record(&mut self, snapshot: TelemetrySnapshot) -> Result<&str, TelemetryError> {
        let json = serde_json::to_string(&snapshot)?;

        if json.len() > MAX_TELEMETRY_SIZE {
            self.metrics.snapshots_dropped = self.metrics.snapshots_dropped.saturating_add(1);
            return Err(TelemetryError::TooLarge {
                len: json.len(),
                max: MAX_TELEMETRY_SIZE,
            });
        }

        self.buffer.clear();
        self.buffer.push_str(&json);
        self.metrics.snapshots_generated = self.metrics.snapshots_generated.saturating_add(1);
        self.metrics.last_size_bytes = json.len() as u32;
        self.latest = Some(snapshot);

        Ok(self.buffer.as_str())
    }

    pub fn get_latest(&self) -> Option<&TelemetrySnapshot> {
        self.latest.as_ref()
    }

    pub fn get_metrics(&self) -> &TelemetryMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_divider() {
        let collector = TelemetryCollector::new(TelemetryConfig { period_cycles: 4 });
        let due: Vec<u64> = (0..10).filter(|c| collector.should_collect(*c)).collect();
        assert_eq!(due, vec![0, 4, 8]);
    }
}
