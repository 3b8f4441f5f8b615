use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fault::{EventStatus, FaultReporter, DTC_WATCHDOG_FAIL};
use crate::signals::{
    SelfTestResult, SignalBus, VehicleState, SIG_BRAKE_FAULT, SIG_FAULT_MASK, SIG_LIDAR_FAULT,
    SIG_SAFETY_STATUS, SIG_SELF_TEST_RESULT, SIG_STEER_FAULT, SIG_VEHICLE_STATE,
};

/// Independent per-subsystem fault bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultMask(u16);

impl FaultMask {
    pub const NONE: Self = Self(0x00);
    pub const STEER: Self = Self(0x01);
    pub const BRAKE: Self = Self(0x02);
    pub const LIDAR: Self = Self(0x04);
    pub const CAN: Self = Self(0x08);
    pub const WATCHDOG: Self = Self(0x10);
    pub const SELF_TEST: Self = Self(0x20);

    /// Bits that alone drive the status to `Fault`.
    pub const CRITICAL: Self = Self(Self::STEER.0 | Self::BRAKE.0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for FaultMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SafetyStatus {
    Ok = 0,
    Degraded = 1,
    Fault = 2,
}

/// Output pin feeding the external hardware watchdog.
pub trait WatchdogLine {
    fn set_level(&mut self, high: bool);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyState {
    pub status: SafetyStatus,
    pub fault_mask: FaultMask,
    pub watchdog_level: bool,
    pub watchdog_fed: bool,
    pub feeds: u32,
    pub withheld_feeds: u32,
}

/// Merges subsystem fault flags and gates the watchdog feed.
#[derive(Debug)]
pub struct SafetyAggregator {
    state: SafetyState,
}

impl SafetyAggregator {
    pub fn new() -> Self {
        Self {
            state: SafetyState {
                status: SafetyStatus::Ok,
                fault_mask: FaultMask::NONE,
                watchdog_level: false,
                watchdog_fed: false,
                feeds: 0,
                withheld_feeds: 0,
            },
        }
    }

    /// 10 ms cyclic entry point.
    pub fn run_cycle<B, W, R>(&mut self, bus: &mut B, watchdog: &mut W, reporter: &mut R)
    where
        B: SignalBus,
        W: WatchdogLine,
        R: FaultReporter,
    {
        let steer_fault = bus.read(SIG_STEER_FAULT);
        let brake_fault = bus.read(SIG_BRAKE_FAULT);
        let lidar_fault = bus.read(SIG_LIDAR_FAULT);
        let vehicle_state = VehicleState::from_raw(bus.read(SIG_VEHICLE_STATE));
        let self_test = SelfTestResult::from_raw(bus.read(SIG_SELF_TEST_RESULT));

        let mut mask = FaultMask::NONE;
        if steer_fault != 0 {
            mask.insert(FaultMask::STEER);
        }
        if brake_fault != 0 {
            mask.insert(FaultMask::BRAKE);
        }
        if lidar_fault != 0 {
            mask.insert(FaultMask::LIDAR);
        }
        if self_test == SelfTestResult::Failed {
            mask.insert(FaultMask::SELF_TEST);
        }

        let status = Self::classify(mask);

        let feed_ok = !mask.intersects(FaultMask::CRITICAL)
            && vehicle_state != Some(VehicleState::Shutdown)
            && self_test != SelfTestResult::Failed;

        if feed_ok {
            self.state.watchdog_level = !self.state.watchdog_level;
            watchdog.set_level(self.state.watchdog_level);
            self.state.feeds = self.state.feeds.wrapping_add(1);
        } else {
            // Leaving the line alone lets the external watchdog reset the ECU.
            if self.state.watchdog_fed || self.state.withheld_feeds == 0 {
                warn!(mask = mask.bits(), ?vehicle_state, ?self_test, "watchdog feed withheld");
            }
            reporter.report(DTC_WATCHDOG_FAIL, EventStatus::Failed);
            mask.insert(FaultMask::WATCHDOG);
            self.state.withheld_feeds = self.state.withheld_feeds.wrapping_add(1);
        }

        if status != self.state.status {
            debug!(from = ?self.state.status, to = ?status, "safety status changed");
        }

        self.state.status = status;
        self.state.fault_mask = mask;
        self.state.watchdog_fed = feed_ok;

        bus.write(SIG_FAULT_MASK, u32::from(mask.bits()));
        bus.write(SIG_SAFETY_STATUS, status as u32);
    }

    /// Status derived from the subsystem bits only.
    pub fn classify(mask: FaultMask) -> SafetyStatus {
        if mask.intersects(FaultMask::CRITICAL) {
            SafetyStatus::Fault
        } else if !mask.is_empty() {
            SafetyStatus::Degraded
        } else {
            SafetyStatus::Ok
        }
    }

    pub fn get_state(&self) -> &SafetyState {
        &self.state
    }

    pub fn status(&self) -> SafetyStatus {
        self.state.status
    }

    pub fn fault_mask(&self) -> FaultMask {
        self.state.fault_mask
    }
}

impl Default for SafetyAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_priority() {
        assert_eq!(SafetyAggregator::classify(FaultMask::NONE), SafetyStatus::Ok);
        assert_eq!(SafetyAggregator::classify(FaultMask::LIDAR), SafetyStatus::Degraded);
        assert_eq!(
            SafetyAggregator::classify(FaultMask::LIDAR | FaultMask::BRAKE),
            SafetyStatus::Fault
        );
        assert_eq!(SafetyAggregator::classify(FaultMask::STEER), SafetyStatus::Fault);
    }

    #[test]
    fn mask_bit_operations() {
        let mut mask = FaultMask::NONE;
        mask.insert(FaultMask::CAN);
        assert!(mask.contains(FaultMask::CAN));
        assert!(!mask.intersects(FaultMask::CRITICAL));
        assert_eq!(mask.bits(), 0x08);
    }
}
