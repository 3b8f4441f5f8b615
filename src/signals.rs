//! Process-wide signal store shared by the zone controller components.
//!
//! Every signal has exactly one producing component. The store does not
//! enforce that: a second writer to the same id silently wins, so any new
//! producer must be checked against the table below before it is wired in.
//! Brake and steer commands are the exception: while the link guard is
//! latched it rewrites them after the receive phase of every cycle.
//!
//! | Id | Signal | Producer |
//! |----|--------|----------|
//! | 16 | steer command | message router (RX), link guard (latched safe state) |
//! | 18 | steer fault | steering component (external) |
//! | 19 | brake command | message router (RX), link guard (latched safe state) |
//! | 21 | brake fault | brake component (external) |
//! | 22..=25 | lidar distance / signal / zone / fault | lidar processor |
//! | 26 | vehicle state | message router (RX) |
//! | 27 | emergency stop | message router (RX) |
//! | 28 | buzzer pattern | link guard |
//! | 29 | motor cutoff | brake component (external) |
//! | 30, 35 | fault mask, safety status | safety aggregator |
//! | 33 | self-test result | startup self-test (external) |

use serde::{Deserialize, Serialize};

pub type SignalId = u16;

pub const SIG_STEER_CMD: SignalId = 16;
pub const SIG_STEER_ANGLE: SignalId = 17;
pub const SIG_STEER_FAULT: SignalId = 18;
pub const SIG_BRAKE_CMD: SignalId = 19;
pub const SIG_BRAKE_POS: SignalId = 20;
pub const SIG_BRAKE_FAULT: SignalId = 21;
pub const SIG_LIDAR_DIST: SignalId = 22;
pub const SIG_LIDAR_SIGNAL: SignalId = 23;
pub const SIG_LIDAR_ZONE: SignalId = 24;
pub const SIG_LIDAR_FAULT: SignalId = 25;
pub const SIG_VEHICLE_STATE: SignalId = 26;
pub const SIG_ESTOP_ACTIVE: SignalId = 27;
pub const SIG_BUZZER_PATTERN: SignalId = 28;
pub const SIG_MOTOR_CUTOFF: SignalId = 29;
pub const SIG_FAULT_MASK: SignalId = 30;
pub const SIG_STEER_PWM_DISABLE: SignalId = 31;
pub const SIG_BRAKE_PWM_DISABLE: SignalId = 32;
pub const SIG_SELF_TEST_RESULT: SignalId = 33;
pub const SIG_HEARTBEAT_ALIVE: SignalId = 34;
pub const SIG_SAFETY_STATUS: SignalId = 35;

/// One past the highest signal id.
pub const SIGNAL_COUNT: usize = 36;

/// Keyed store of 32-bit cells. Reads of a never-written id yield zero.
pub trait SignalBus {
    fn read(&self, id: SignalId) -> u32;
    fn write(&mut self, id: SignalId, value: u32);
}

/// Fixed-size in-memory signal bus.
#[derive(Debug, Clone)]
pub struct SignalStore {
    cells: [u32; SIGNAL_COUNT],
    write_count: u32,
}

impl SignalStore {
    pub fn new() -> Self {
        Self {
            cells: [0; SIGNAL_COUNT],
            write_count: 0,
        }
    }

    /// Total writes accepted since construction (diagnostics only).
    pub fn write_count(&self) -> u32 {
        self.write_count
    }
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus for SignalStore {
    fn read(&self, id: SignalId) -> u32 {
        self.cells.get(usize::from(id)).copied().unwrap_or(0)
    }

    fn write(&mut self, id: SignalId, value: u32) {
        // Unknown ids are dropped; the bus never fails observably.
        if let Some(cell) = self.cells.get_mut(usize::from(id)) {
            *cell = value;
            self.write_count = self.write_count.wrapping_add(1);
        }
    }
}

/// Steering angle in whole degrees, positive to the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SteerDegrees(pub i16);

impl SteerDegrees {
    pub const CENTER: Self = Self(0);

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(i16::from_le_bytes(bytes))
    }

    /// Bus encoding: the i16 bit pattern zero-extended into the cell.
    pub fn to_signal(self) -> u32 {
        u32::from(self.0 as u16)
    }

    pub fn from_signal(raw: u32) -> Self {
        Self(raw as u16 as i16)
    }
}

/// Brake actuation request, 0..=100 percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BrakePercent(u8);

impl BrakePercent {
    pub const RELEASED: Self = Self(0);
    pub const FULL: Self = Self(100);

    /// Clamps to the valid range.
    pub fn new(percent: u8) -> Self {
        Self(percent.min(100))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn to_signal(self) -> u32 {
        u32::from(self.0)
    }

    pub fn from_signal(raw: u32) -> Self {
        Self::new(u8::try_from(raw).unwrap_or(u8::MAX))
    }
}

/// Vehicle state broadcast by the central controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VehicleState {
    Init = 0,
    Run = 1,
    Degraded = 2,
    Limp = 3,
    SafeStop = 4,
    Shutdown = 5,
}

impl VehicleState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Init),
            1 => Some(Self::Run),
            2 => Some(Self::Degraded),
            3 => Some(Self::Limp),
            4 => Some(Self::SafeStop),
            5 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BuzzerPattern {
    Silent = 0,
    SingleBeep = 1,
    SlowRepeat = 2,
    FastRepeat = 3,
    Continuous = 4,
}

impl BuzzerPattern {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Silent),
            1 => Some(Self::SingleBeep),
            2 => Some(Self::SlowRepeat),
            3 => Some(Self::FastRepeat),
            4 => Some(Self::Continuous),
            _ => None,
        }
    }
}

/// Startup self-test outcome. Zero is "not run" so an unwritten cell never
/// reads as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SelfTestResult {
    NotRun = 0,
    Passed = 1,
    Failed = 2,
}

impl SelfTestResult {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Passed,
            2 => Self::Failed,
            _ => Self::NotRun,
        }
    }
}
