use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Subsystem, SubsystemId};
use crate::config::CYCLE_PERIOD_MS;
use crate::fault::{EventStatus, FaultReporter, DTC_CAN_BUS_OFF};
use crate::signals::{
    BrakePercent, BuzzerPattern, SignalBus, SteerDegrees, SIG_BRAKE_CMD, SIG_BUZZER_PATTERN,
    SIG_STEER_CMD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerMode {
    Uninit,
    Stopped,
    Started,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub tec: u8,
    pub rec: u8,
}

/// Health readout of the CAN controller.
pub trait LinkStatusSource {
    fn controller_mode(&self) -> ControllerMode;
    fn error_counters(&self) -> ErrorCounters;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkGuardConfig {
    pub silence_ms: u16,
    pub error_counter_threshold: u8,
    pub error_warning_cycles: u16,
}

impl Default for LinkGuardConfig {
    fn default() -> Self {
        Self {
            silence_ms: 200,
            error_counter_threshold: 96,
            error_warning_cycles: 50,
        }
    }
}

impl LinkGuardConfig {
    pub fn silence_cycles(&self) -> u16 {
        (self.silence_ms / CYCLE_PERIOD_MS).max(1)
    }
}

/// Condition that latched the safe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFault {
    BusOff,
    Silence,
    ErrorWarning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkStatus {
    Ok = 0,
    BusOff = 1,
    Silence = 2,
    ErrorWarning = 3,
}

impl From<LinkFault> for LinkStatus {
    fn from(fault: LinkFault) -> Self {
        match fault {
            LinkFault::BusOff => LinkStatus::BusOff,
            LinkFault::Silence => LinkStatus::Silence,
            LinkFault::ErrorWarning => LinkStatus::ErrorWarning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveMonitor {
    pub silence_count: u16,
    pub err_warn_count: u16,
}

/// Monitor state. `Latched` has no transition back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Active(ActiveMonitor),
    Latched(LinkFault),
}

/// Watches bus health and latches a safe actuator state on loss of the bus.
#[derive(Debug)]
pub struct CanLinkGuard {
    config: LinkGuardConfig,
    state: LinkState,
    latched_cycles: u32,
}

impl CanLinkGuard {
    pub fn new(config: LinkGuardConfig) -> Self {
        Self {
            config,
            state: LinkState::Active(ActiveMonitor::default()),
            latched_cycles: 0,
        }
    }

    pub fn config(&self) -> &LinkGuardConfig {
        &self.config
    }

    /// 10 ms cyclic entry point.
    pub fn run_cycle<L, B, R>(&mut self, link: &L, bus: &mut B, reporter: &mut R) -> LinkStatus
    where
        L: LinkStatusSource,
        B: SignalBus,
        R: FaultReporter,
    {
        let next = match self.state {
            LinkState::Latched(fault) => LinkState::Latched(fault),
            LinkState::Active(monitor) => self.check(monitor, link),
        };

        if let LinkState::Latched(fault) = next {
            if matches!(self.state, LinkState::Active(_)) {
                error!(?fault, "CAN link lost, safe state latched until restart");
            }
            self.latched_cycles = self.latched_cycles.saturating_add(1);
            Self::apply_safe_state(bus, reporter);
        }

        self.state = next;
        self.status()
    }

    fn check<L: LinkStatusSource>(&self, mut monitor: ActiveMonitor, link: &L) -> LinkState {
        if link.controller_mode() == ControllerMode::Stopped {
            return LinkState::Latched(LinkFault::BusOff);
        }

        monitor.silence_count = monitor.silence_count.saturating_add(1);
        if monitor.silence_count >= self.config.silence_cycles() {
            return LinkState::Latched(LinkFault::Silence);
        }

        let counters = link.error_counters();
        let threshold = self.config.error_counter_threshold;
        if counters.tec >= threshold || counters.rec >= threshold {
            monitor.err_warn_count = monitor.err_warn_count.saturating_add(1);
            debug!(tec = counters.tec, rec = counters.rec, sustained = monitor.err_warn_count, "CAN error warning");
            if monitor.err_warn_count >= self.config.error_warning_cycles {
                return LinkState::Latched(LinkFault::ErrorWarning);
            }
        } else {
            monitor.err_warn_count = 0;
        }

        LinkState::Active(monitor)
    }

    fn apply_safe_state<B: SignalBus, R: FaultReporter>(bus: &mut B, reporter: &mut R) {
        Self::write_safe_outputs(bus);
        reporter.report(DTC_CAN_BUS_OFF, EventStatus::Failed);
    }

    fn write_safe_outputs<B: SignalBus>(bus: &mut B) {
        bus.write(SIG_BRAKE_CMD, BrakePercent::FULL.to_signal());
        bus.write(SIG_STEER_CMD, SteerDegrees::CENTER.to_signal());
        bus.write(SIG_BUZZER_PATTERN, BuzzerPattern::Continuous as u32);
    }

    /// Re-asserts the forced outputs over any later writer in the same cycle.
    /// No effect while the link is active.
    pub fn enforce_outputs<B: SignalBus>(&self, bus: &mut B) {
        if self.is_latched() {
            Self::write_safe_outputs(bus);
        }
    }

    /// Called by the receive path whenever at least one frame arrived.
    pub fn notify_rx(&mut self) {
        if let LinkState::Active(monitor) = &mut self.state {
            monitor.silence_count = 0;
        }
    }

    pub fn status(&self) -> LinkStatus {
        match self.state {
            LinkState::Active(_) => LinkStatus::Ok,
            LinkState::Latched(fault) => fault.into(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        matches!(self.state, LinkState::Latched(_))
    }

    pub fn latched_cycles(&self) -> u32 {
        self.latched_cycles
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGuardSnapshot {
    pub status: LinkStatus,
    pub state: LinkState,
    pub latched_cycles: u32,
}

impl Subsystem for CanLinkGuard {
    type State = LinkGuardSnapshot;

    fn id(&self) -> SubsystemId {
        SubsystemId::CanLink
    }

    fn get_state(&self) -> Self::State {
        LinkGuardSnapshot {
            status: self.status(),
            state: self.state,
            latched_cycles: self.latched_cycles,
        }
    }

    fn is_healthy(&self) -> bool {
        !self.is_latched()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_window_is_twenty_cycles() {
        assert_eq!(LinkGuardConfig::default().silence_cycles(), 20);
    }

    #[test]
    fn notify_rx_is_ignored_once_latched() {
        let mut guard = CanLinkGuard::new(LinkGuardConfig::default());
        guard.state = LinkState::Latched(LinkFault::Silence);
        guard.notify_rx();
        assert_eq!(guard.state(), LinkState::Latched(LinkFault::Silence));
    }

    #[test]
    fn status_maps_latch_reason() {
        assert_eq!(LinkStatus::from(LinkFault::BusOff), LinkStatus::BusOff);
        assert_eq!(LinkStatus::from(LinkFault::ErrorWarning) as u8, 3);
    }
}
