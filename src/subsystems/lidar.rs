//! Forward distance sensor processing (TFMini-S style UART frames).
//!
//! Frame layout, 9 bytes:
//!
//! ```text
//! [0] 0x59  [1] 0x59  [2..4] distance cm LE  [4..6] signal LE  [6..8] unused  [8] checksum
//! ```
//!
//! The checksum is the low byte of the sum of bytes 0..8.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Subsystem, SubsystemId};
use crate::config::CYCLE_PERIOD_MS;
use crate::fault::{
    EventStatus, FaultReporter, DTC_LIDAR_CHECKSUM, DTC_LIDAR_SIGNAL_LOW, DTC_LIDAR_STUCK,
    DTC_LIDAR_TIMEOUT,
};
use crate::signals::{
    SignalBus, SIG_LIDAR_DIST, SIG_LIDAR_FAULT, SIG_LIDAR_SIGNAL, SIG_LIDAR_ZONE,
};

pub const FRAME_SIZE: usize = 9;
pub const HEADER_BYTE: u8 = 0x59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("UART overrun")]
    Overrun,
    #[error("UART framing error")]
    Framing,
    #[error("sensor not connected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("incomplete frame: {len} of 9 bytes")]
    Incomplete { len: usize },
    #[error("bad header {0:#04x} {1:#04x}")]
    BadHeader(u8, u8),
    #[error("checksum mismatch: frame says {received:#04x}, computed {computed:#04x}")]
    Checksum { received: u8, computed: u8 },
}

/// Byte source for the distance sensor. Never blocks: `WouldBlock` means
/// nothing is buffered yet.
pub trait SensorSource {
    fn read_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> nb::Result<usize, SensorError>;
}

/// A validated sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub distance_cm: u16,
    pub signal: u16,
}

impl SensorFrame {
    pub fn checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    pub fn parse(bytes: &[u8; FRAME_SIZE], len: usize) -> Result<Self, FrameError> {
        if len < FRAME_SIZE {
            return Err(FrameError::Incomplete { len });
        }
        if bytes[0] != HEADER_BYTE || bytes[1] != HEADER_BYTE {
            return Err(FrameError::BadHeader(bytes[0], bytes[1]));
        }

        let computed = Self::checksum(&bytes[..8]);
        if computed != bytes[8] {
            return Err(FrameError::Checksum {
                received: bytes[8],
                computed,
            });
        }

        Ok(Self {
            distance_cm: u16::from_le_bytes([bytes[2], bytes[3]]),
            signal: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }

    /// Wire form with a correct header and checksum.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        let distance = self.distance_cm.to_le_bytes();
        let signal = self.signal.to_le_bytes();
        bytes[0] = HEADER_BYTE;
        bytes[1] = HEADER_BYTE;
        bytes[2] = distance[0];
        bytes[3] = distance[1];
        bytes[4] = signal[0];
        bytes[5] = signal[1];
        bytes[8] = Self::checksum(&bytes[..8]);
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LidarZone {
    Clear = 0,
    Warning = 1,
    Braking = 2,
    Emergency = 3,
    Fault = 4,
}

impl LidarZone {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Clear),
            1 => Some(Self::Warning),
            2 => Some(Self::Braking),
            3 => Some(Self::Emergency),
            4 => Some(Self::Fault),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarConfig {
    pub warn_cm: u16,
    pub brake_cm: u16,
    pub emergency_cm: u16,
    pub timeout_ms: u16,
    pub stuck_cycles: u16,
    pub range_min_cm: u16,
    pub range_max_cm: u16,
    pub signal_min: u16,
    pub degrade_cycles: u16,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            warn_cm: 100,
            brake_cm: 50,
            emergency_cm: 20,
            timeout_ms: 100,
            stuck_cycles: 50,
            range_min_cm: 2,
            range_max_cm: 1200,
            signal_min: 100,
            degrade_cycles: 200,
        }
    }
}

impl LidarConfig {
    /// Missing-frame cycles before the timeout fault is raised.
    pub fn timeout_cycles(&self) -> u16 {
        (self.timeout_ms / CYCLE_PERIOD_MS).max(1)
    }

    /// Nested inclusive thresholds: emergency, then braking, then warning.
    pub fn classify(&self, distance_cm: u16) -> LidarZone {
        if distance_cm <= self.emergency_cm {
            LidarZone::Emergency
        } else if distance_cm <= self.brake_cm {
            LidarZone::Braking
        } else if distance_cm <= self.warn_cm {
            LidarZone::Warning
        } else {
            LidarZone::Clear
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarState {
    pub distance_cm: u16,
    pub signal: u16,
    pub zone: LidarZone,
    pub fault: bool,
    pub timeout_counter: u16,
    pub stuck_counter: u16,
    pub persistent_fault_counter: u16,
    pub frames_ok: u32,
    pub frames_rejected: u32,
}

#[derive(Debug)]
pub struct LidarProcessor {
    config: LidarConfig,
    state: LidarState,
    prev_distance: u16,
    buf: [u8; FRAME_SIZE],
}

impl LidarProcessor {
    /// Outputs start in the fault zone until the first good frame arrives.
    pub fn new(config: LidarConfig) -> Self {
        Self {
            config,
            state: LidarState {
                distance_cm: 0,
                signal: 0,
                zone: LidarZone::Fault,
                fault: false,
                timeout_counter: 0,
                stuck_counter: 0,
                persistent_fault_counter: 0,
                frames_ok: 0,
                frames_rejected: 0,
            },
            prev_distance: 0,
            buf: [0; FRAME_SIZE],
        }
    }

    pub fn config(&self) -> &LidarConfig {
        &self.config
    }

    fn read_frame<S, R>(&mut self, sensor: &mut S, reporter: &mut R) -> Option<SensorFrame>
    where
        S: SensorSource,
        R: FaultReporter,
    {
        let len = match sensor.read_frame(&mut self.buf) {
            Ok(len) => len,
            Err(nb::Error::WouldBlock) => return None,
            Err(nb::Error::Other(e)) => {
                debug!(error = %e, "lidar read failed");
                return None;
            }
        };

        match SensorFrame::parse(&self.buf, len) {
            Ok(frame) => {
                self.state.frames_ok = self.state.frames_ok.wrapping_add(1);
                Some(frame)
            }
            Err(FrameError::Incomplete { .. }) => None,
            Err(e) => {
                debug!(error = %e, "lidar frame rejected");
                self.state.frames_rejected = self.state.frames_rejected.wrapping_add(1);
                reporter.report(DTC_LIDAR_CHECKSUM, EventStatus::Failed);
                None
            }
        }
    }

    /// Range, signal and stuck checks. Returns true when the reading is faulted.
    fn check_plausibility<R: FaultReporter>(&mut self, frame: SensorFrame, reporter: &mut R) -> bool {
        let mut fault = false;

        if frame.distance_cm < self.config.range_min_cm || frame.distance_cm > self.config.range_max_cm
        {
            fault = true;
        }

        if frame.signal < self.config.signal_min {
            fault = true;
            reporter.report(DTC_LIDAR_SIGNAL_LOW, EventStatus::Failed);
        }

        if !fault {
            if frame.distance_cm == self.prev_distance {
                self.state.stuck_counter = self.state.stuck_counter.saturating_add(1);
                if self.state.stuck_counter >= self.config.stuck_cycles {
                    fault = true;
                    reporter.report(DTC_LIDAR_STUCK, EventStatus::Failed);
                }
            } else {
                self.state.stuck_counter = 0;
            }
            self.prev_distance = frame.distance_cm;
        }

        fault
    }

    /// 10 ms cyclic entry point.
    pub fn run_cycle<S, B, R>(&mut self, sensor: &mut S, bus: &mut B, reporter: &mut R) -> LidarZone
    where
        S: SensorSource,
        B: SignalBus,
        R: FaultReporter,
    {
        let frame = self.read_frame(sensor, reporter);
        let mut fault = false;

        if frame.is_some() {
            self.state.timeout_counter = 0;
        } else {
            self.state.timeout_counter = self.state.timeout_counter.saturating_add(1);
        }

        let timeout_cycles = self.config.timeout_cycles();
        if self.state.timeout_counter >= timeout_cycles {
            fault = true;
            reporter.report(DTC_LIDAR_TIMEOUT, EventStatus::Failed);
            self.state.timeout_counter = timeout_cycles;
        }

        if let Some(frame) = frame {
            if !fault {
                fault = self.check_plausibility(frame, reporter);
            }
        }

        if fault && !self.state.fault {
            warn!(
                timeout = self.state.timeout_counter,
                stuck = self.state.stuck_counter,
                "lidar entered fault zone"
            );
        }
        self.state.fault = fault;

        if fault {
            self.state.distance_cm = 0;
            self.state.signal = 0;
            self.state.zone = LidarZone::Fault;
            self.state.persistent_fault_counter =
                self.state.persistent_fault_counter.saturating_add(1);
        } else if let Some(frame) = frame {
            self.state.distance_cm = frame.distance_cm;
            self.state.signal = frame.signal;
            self.state.zone = self.config.classify(frame.distance_cm);
            self.state.persistent_fault_counter = 0;

            for dtc in [
                DTC_LIDAR_TIMEOUT,
                DTC_LIDAR_CHECKSUM,
                DTC_LIDAR_STUCK,
                DTC_LIDAR_SIGNAL_LOW,
            ] {
                reporter.report(dtc, EventStatus::Passed);
            }
        }

        bus.write(SIG_LIDAR_DIST, u32::from(self.state.distance_cm));
        bus.write(SIG_LIDAR_SIGNAL, u32::from(self.state.signal));
        bus.write(SIG_LIDAR_ZONE, u32::from(self.state.zone.as_raw()));
        bus.write(SIG_LIDAR_FAULT, u32::from(self.state.fault));

        self.state.zone
    }

    pub fn distance_cm(&self) -> u16 {
        self.state.distance_cm
    }

    pub fn zone(&self) -> LidarZone {
        self.state.zone
    }

    /// Set once faults have persisted past the configured degradation window.
    pub fn degradation_requested(&self) -> bool {
        self.state.persistent_fault_counter > self.config.degrade_cycles
    }
}

impl Subsystem for LidarProcessor {
    type State = LidarState;

    fn id(&self) -> SubsystemId {
        SubsystemId::Lidar
    }

    fn get_state(&self) -> Self::State {
        self.state.clone()
    }

    fn is_healthy(&self) -> bool {
        !self.state.fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_bad_header_before_checksum() {
        let mut bytes = SensorFrame { distance_cm: 150, signal: 500 }.encode();
        bytes[1] = 0x58;
        assert_eq!(
            SensorFrame::parse(&bytes, FRAME_SIZE),
            Err(FrameError::BadHeader(0x59, 0x58))
        );
    }

    #[test]
    fn parse_reads_little_endian_fields() {
        let bytes = [0x59, 0x59, 0x2C, 0x01, 0xE8, 0x03, 0x00, 0x00, 0x00];
        let mut bytes = bytes;
        bytes[8] = SensorFrame::checksum(&bytes[..8]);
        let frame = SensorFrame::parse(&bytes, FRAME_SIZE).unwrap();
        assert_eq!(frame.distance_cm, 300);
        assert_eq!(frame.signal, 1000);
    }

    #[test]
    fn short_read_is_incomplete() {
        let bytes = SensorFrame { distance_cm: 150, signal: 500 }.encode();
        assert_eq!(
            SensorFrame::parse(&bytes, 5),
            Err(FrameError::Incomplete { len: 5 })
        );
    }

    #[test]
    fn timeout_cycles_derive_from_tick() {
        assert_eq!(LidarConfig::default().timeout_cycles(), 10);
        let cfg = LidarConfig { timeout_ms: 5, ..LidarConfig::default() };
        assert_eq!(cfg.timeout_cycles(), 1);
    }
}
