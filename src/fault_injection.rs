//! Software-in-the-loop harness.
//!
//! [`SimIo`] stands in for the UART, CAN stack and watchdog pin. It also plays
//! the central controller, feeding protected command frames every cycle.
//! [`FaultInjector`] adds seeded random transient faults on top and
//! [`Scenario`] scripts persistent ones.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::e2e::E2eCodec;
use crate::protocol::{
    brake_command_payload, single_byte_payload, steer_command_payload, Frame, MessageTransport,
    RxPdu, TransportError, TxPdu,
};
use crate::safety::WatchdogLine;
use crate::signals::{BrakePercent, SteerDegrees, VehicleState};
use crate::subsystems::lidar::FRAME_SIZE;
use crate::subsystems::{
    ControllerMode, ErrorCounters, LinkStatusSource, SensorError, SensorFrame, SensorSource,
};

const MAX_SENT_LOG: usize = 256;

// Per-cycle transient fault rates
const SENSOR_CHECKSUM_RATE_PERCENT: f32 = 0.5;
const SENSOR_DROPOUT_RATE_PERCENT: f32 = 1.0;
const RX_CORRUPTION_RATE_PERCENT: f32 = 0.2;

/// Simulated hardware for one controller.
#[derive(Debug)]
pub struct SimIo {
    // distance sensor
    pub distance_cm: u16,
    pub signal: u16,
    pub lidar_jitter: bool,
    pub lidar_dropout: bool,
    pub lidar_error: Option<SensorError>,
    pub lidar_short_read: bool,
    corrupt_lidar_frames: u32,
    jitter_phase: bool,

    // CAN side
    pub mode: ControllerMode,
    pub counters: ErrorCounters,
    pub fail_sends: bool,
    rx: [Option<Frame>; 4],
    corrupt_rx_frames: u32,
    sender: E2eCodec,
    sent: VecDeque<(TxPdu, Frame)>,
    sent_totals: [u32; 4],

    // watchdog input line
    wdi_level: bool,
    wdi_toggles: u32,
}

impl SimIo {
    pub fn new() -> Self {
        Self {
            distance_cm: 300,
            signal: 1000,
            lidar_jitter: false,
            lidar_dropout: false,
            lidar_error: None,
            lidar_short_read: false,
            corrupt_lidar_frames: 0,
            jitter_phase: false,
            mode: ControllerMode::Started,
            counters: ErrorCounters::default(),
            fail_sends: false,
            rx: [None; 4],
            corrupt_rx_frames: 0,
            sender: E2eCodec::new(),
            sent: VecDeque::new(),
            sent_totals: [0; 4],
            wdi_level: false,
            wdi_toggles: 0,
        }
    }

    pub fn set_lidar(&mut self, distance_cm: u16, signal: u16) {
        self.distance_cm = distance_cm;
        self.signal = signal;
    }

    /// Corrupts the checksum of the next `count` sensor frames.
    pub fn corrupt_next_lidar_frames(&mut self, count: u32) {
        self.corrupt_lidar_frames = self.corrupt_lidar_frames.saturating_add(count);
    }

    /// Queues an inbound frame exactly as given (no protection applied).
    pub fn queue_raw(&mut self, pdu: RxPdu, frame: Frame) {
        self.rx[pdu.index()] = Some(frame);
    }

    /// Protects `payload` with the central controller's codec and queues it.
    pub fn queue_protected(&mut self, pdu: RxPdu, mut payload: Frame) {
        // payload is a full frame, protection cannot fail
        let _ = self.sender.protect(&mut payload, pdu.data_id());
        self.queue_raw(pdu, payload);
    }

    /// One cycle of central controller traffic on all four inbound kinds.
    pub fn drive_central(&mut self, state: VehicleState, brake: BrakePercent, steer: SteerDegrees, estop: bool) {
        self.queue_protected(RxPdu::EmergencyStop, single_byte_payload(u8::from(estop)));
        self.queue_protected(RxPdu::VehicleState, single_byte_payload(state as u8));
        self.queue_protected(RxPdu::BrakeCommand, brake_command_payload(brake));
        self.queue_protected(RxPdu::SteerCommand, steer_command_payload(steer));
    }

    /// Flips a CRC bit in the next `count` frames handed to the receiver.
    pub fn corrupt_next_rx_frames(&mut self, count: u32) {
        self.corrupt_rx_frames = self.corrupt_rx_frames.saturating_add(count);
    }

    pub fn sent(&self) -> impl Iterator<Item = &(TxPdu, Frame)> + '_ {
        self.sent.iter()
    }

    /// Frames accepted for `pdu` since construction, including ones evicted from the log.
    pub fn sent_count(&self, pdu: TxPdu) -> u32 {
        self.sent_totals[pdu.index()]
    }

    pub fn take_sent(&mut self) -> Vec<(TxPdu, Frame)> {
        self.sent.drain(..).collect()
    }

    pub fn wdi_level(&self) -> bool {
        self.wdi_level
    }

    pub fn wdi_toggles(&self) -> u32 {
        self.wdi_toggles
    }
}

impl Default for SimIo {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimIo {
    fn read_frame(&mut self, buf: &mut [u8; FRAME_SIZE]) -> nb::Result<usize, SensorError> {
        if let Some(e) = self.lidar_error {
            return Err(nb::Error::Other(e));
        }
        if self.lidar_dropout {
            return Err(nb::Error::WouldBlock);
        }

        let distance = if self.lidar_jitter && self.jitter_phase {
            self.distance_cm.saturating_add(1)
        } else {
            self.distance_cm
        };
        self.jitter_phase = !self.jitter_phase;

        *buf = SensorFrame {
            distance_cm: distance,
            signal: self.signal,
        }
        .encode();

        if self.corrupt_lidar_frames > 0 {
            self.corrupt_lidar_frames -= 1;
            buf[8] = buf[8].wrapping_add(1);
        }

        if self.lidar_short_read {
            return Ok(FRAME_SIZE / 2);
        }
        Ok(FRAME_SIZE)
    }
}

impl MessageTransport for SimIo {
    fn receive(&mut self, pdu: RxPdu) -> Option<Frame> {
        let mut frame = self.rx[pdu.index()].take()?;
        if self.mode != ControllerMode::Started {
            return None;
        }
        if self.corrupt_rx_frames > 0 {
            self.corrupt_rx_frames -= 1;
            frame[0] ^= 0x01;
        }
        Some(frame)
    }

    fn send(&mut self, pdu: TxPdu, frame: &Frame) -> Result<(), TransportError> {
        if self.mode != ControllerMode::Started {
            return Err(TransportError::ControllerStopped);
        }
        if self.fail_sends {
            return Err(TransportError::BufferFull(pdu.pdu_id()));
        }
        if self.sent.len() >= MAX_SENT_LOG {
            self.sent.pop_front();
        }
        self.sent.push_back((pdu, *frame));
        self.sent_totals[pdu.index()] = self.sent_totals[pdu.index()].wrapping_add(1);
        Ok(())
    }
}

impl LinkStatusSource for SimIo {
    fn controller_mode(&self) -> ControllerMode {
        self.mode
    }

    fn error_counters(&self) -> ErrorCounters {
        self.counters
    }
}

impl WatchdogLine for SimIo {
    fn set_level(&mut self, high: bool) {
        if high != self.wdi_level {
            self.wdi_toggles = self.wdi_toggles.wrapping_add(1);
        }
        self.wdi_level = high;
    }
}

/// Transient fault kinds the injector can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectedFault {
    SensorChecksum,
    SensorDropout,
    RxCorruption,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FaultInjectionStats {
    pub total_faults_injected: u32,
    pub sensor_checksum_faults: u32,
    pub sensor_dropouts: u32,
    pub rx_corruptions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    pub sensor_checksum_rate_percent: f32,
    pub sensor_dropout_rate_percent: f32,
    pub rx_corruption_rate_percent: f32,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_checksum_rate_percent: SENSOR_CHECKSUM_RATE_PERCENT,
            sensor_dropout_rate_percent: SENSOR_DROPOUT_RATE_PERCENT,
            rx_corruption_rate_percent: RX_CORRUPTION_RATE_PERCENT,
        }
    }
}

/// Seeded random transient faults.
#[derive(Debug)]
pub struct FaultInjector {
    config: FaultInjectionConfig,
    stats: FaultInjectionStats,
    dropout_remaining: u8,
    rng_state: u64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::new_with_config(FaultInjectionConfig::default())
    }

    pub fn new_with_config(config: FaultInjectionConfig) -> Self {
        Self {
            config,
            stats: FaultInjectionStats::default(),
            dropout_remaining: 0,
            rng_state: 0x1234_5678_9ABC_DEF0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_state = seed;
        self
    }

    /// Call once per cycle before the controller runs.
    pub fn update(&mut self, io: &mut SimIo) -> heapless::Vec<InjectedFault, 3> {
        let mut injected = heapless::Vec::new();

        if self.dropout_remaining > 0 {
            self.dropout_remaining -= 1;
            io.lidar_dropout = self.dropout_remaining > 0;
        }

        if !self.config.enabled {
            return injected;
        }

        if self.roll(self.config.sensor_checksum_rate_percent) {
            io.corrupt_next_lidar_frames(1);
            self.record(InjectedFault::SensorChecksum, &mut injected);
        }

        if self.dropout_remaining == 0 && self.roll(self.config.sensor_dropout_rate_percent) {
            // short bursts, well under the sensor timeout
            self.dropout_remaining = 1 + self.random_u8() % 5;
            io.lidar_dropout = true;
            self.record(InjectedFault::SensorDropout, &mut injected);
        }

        if self.roll(self.config.rx_corruption_rate_percent) {
            io.corrupt_next_rx_frames(1);
            self.record(InjectedFault::RxCorruption, &mut injected);
        }

        injected
    }

    fn record(&mut self, fault: InjectedFault, injected: &mut heapless::Vec<InjectedFault, 3>) {
        debug!(?fault, "fault injected");
        let _ = injected.push(fault);
        self.stats.total_faults_injected += 1;
        match fault {
            InjectedFault::SensorChecksum => self.stats.sensor_checksum_faults += 1,
            InjectedFault::SensorDropout => self.stats.sensor_dropouts += 1,
            InjectedFault::RxCorruption => self.stats.rx_corruptions += 1,
        }
    }

    pub fn get_stats(&self) -> &FaultInjectionStats {
        &self.stats
    }

    pub fn get_config(&self) -> &FaultInjectionConfig {
        &self.config
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    fn roll(&mut self, rate_percent: f32) -> bool {
        self.random_float() < rate_percent / 100.0
    }

    // Linear congruential generator, Numerical Recipes parameters
    fn next_random(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.rng_state
    }

    fn random_u8(&mut self) -> u8 {
        (self.next_random() >> 24) as u8
    }

    fn random_float(&mut self) -> f32 {
        (self.next_random() as f32) / (u64::MAX as f32)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycle at which scripted faults begin.
pub const SCENARIO_FAULT_CYCLE: u64 = 100;

/// Scripted simulation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    Nominal,
    ObstacleApproach,
    SensorDropout,
    StuckSensor,
    CorruptedCommands,
    BusOff,
    BusSilence,
    ErrorWarning,
    RandomFaults,
}

impl Scenario {
    pub const ALL: [Scenario; 9] = [
        Scenario::Nominal,
        Scenario::ObstacleApproach,
        Scenario::SensorDropout,
        Scenario::StuckSensor,
        Scenario::CorruptedCommands,
        Scenario::BusOff,
        Scenario::BusSilence,
        Scenario::ErrorWarning,
        Scenario::RandomFaults,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Nominal => "nominal",
            Scenario::ObstacleApproach => "obstacle",
            Scenario::SensorDropout => "sensor-dropout",
            Scenario::StuckSensor => "stuck-sensor",
            Scenario::CorruptedCommands => "corrupted-commands",
            Scenario::BusOff => "bus-off",
            Scenario::BusSilence => "bus-silence",
            Scenario::ErrorWarning => "error-warning",
            Scenario::RandomFaults => "random",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    pub fn uses_injector(self) -> bool {
        self == Scenario::RandomFaults
    }

    /// Sets up the simulated world for `cycle` (0-based) before the controller runs.
    pub fn apply(self, cycle: u64, io: &mut SimIo) {
        let faulted = cycle >= SCENARIO_FAULT_CYCLE;

        if cycle == 0 {
            io.lidar_jitter = true;
        }

        let central_alive = !(self == Scenario::BusSilence && faulted);
        if central_alive {
            io.drive_central(
                VehicleState::Run,
                BrakePercent::RELEASED,
                SteerDegrees::CENTER,
                false,
            );
        }

        match self {
            Scenario::Nominal | Scenario::RandomFaults | Scenario::BusSilence => {}
            Scenario::ObstacleApproach => {
                let distance = 300u64.saturating_sub(cycle).max(15);
                io.distance_cm = distance as u16;
            }
            Scenario::SensorDropout => io.lidar_dropout = faulted,
            Scenario::StuckSensor => io.lidar_jitter = !faulted,
            Scenario::CorruptedCommands => {
                if faulted && cycle % 10 == 0 {
                    io.corrupt_next_rx_frames(4);
                }
            }
            Scenario::BusOff => {
                if faulted {
                    io.mode = ControllerMode::Stopped;
                }
            }
            Scenario::ErrorWarning => {
                if faulted {
                    io.counters = ErrorCounters { tec: 128, rec: 0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(Scenario::from_name(scenario.name()), Some(scenario));
        }
        assert_eq!(Scenario::from_name("meteor"), None);
    }

    #[test]
    fn disabled_injector_does_nothing() {
        let config = FaultInjectionConfig {
            enabled: false,
            ..FaultInjectionConfig::default()
        };
        let mut injector = FaultInjector::new_with_config(config);
        let mut io = SimIo::new();
        for _ in 0..1000 {
            assert!(injector.update(&mut io).is_empty());
        }
        assert_eq!(injector.get_stats().total_faults_injected, 0);
    }

    #[test]
    fn injector_is_deterministic_for_a_seed() {
        let mut a = FaultInjector::new().with_seed(42);
        let mut b = FaultInjector::new().with_seed(42);
        let mut io_a = SimIo::new();
        let mut io_b = SimIo::new();
        for _ in 0..2000 {
            assert_eq!(a.update(&mut io_a), b.update(&mut io_b));
        }
        assert_eq!(
            a.get_stats().total_faults_injected,
            b.get_stats().total_faults_injected
        );
    }

    #[test]
    fn always_on_rates_inject_every_kind() {
        let config = FaultInjectionConfig {
            enabled: true,
            sensor_checksum_rate_percent: 100.0,
            sensor_dropout_rate_percent: 100.0,
            rx_corruption_rate_percent: 100.0,
        };
        let mut injector = FaultInjector::new_with_config(config);
        let mut io = SimIo::new();
        let injected = injector.update(&mut io);
        assert_eq!(injected.len(), 3);
        assert!(io.lidar_dropout);
    }

    #[test]
    fn watchdog_line_counts_edges() {
        let mut io = SimIo::new();
        io.set_level(true);
        io.set_level(true);
        io.set_level(false);
        assert_eq!(io.wdi_toggles(), 2);
    }
}
