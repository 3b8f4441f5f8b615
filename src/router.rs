//! Inbound/outbound message handling around the E2E codec.
//!
//! Receive verifies every inbound kind and publishes its payload or a safe
//! default. Transmit sends the periodic heartbeat and the event-latched
//! status messages.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CYCLE_PERIOD_MS;
use crate::e2e::{E2eCodec, ALIVE_UNSET};
use crate::protocol::{
    self, brake_fault_payload, heartbeat_payload, lidar_warning_payload, motor_cutoff_payload,
    Frame, MessageTransport, RxPdu, TxPdu,
};
use crate::safety::FaultMask;
use crate::signals::{
    BrakePercent, SignalBus, SteerDegrees, SIG_BRAKE_CMD, SIG_BRAKE_FAULT, SIG_ESTOP_ACTIVE,
    SIG_FAULT_MASK, SIG_LIDAR_DIST, SIG_LIDAR_ZONE, SIG_MOTOR_CUTOFF, SIG_STEER_CMD,
    SIG_VEHICLE_STATE,
};
use crate::subsystems::LidarZone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub heartbeat_period_ms: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: 50,
        }
    }
}

impl RouterConfig {
    pub fn heartbeat_period_cycles(&self) -> u16 {
        (self.heartbeat_period_ms / CYCLE_PERIOD_MS).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub frames_received: u32,
    pub e2e_failures: u32,
    pub safe_defaults_applied: u32,
    pub frames_sent: u32,
    pub send_failures: u32,
}

/// Outcome of one receive phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxSummary {
    pub received: u8,
    pub e2e_failures: u8,
}

impl RxSummary {
    pub fn any_received(&self) -> bool {
        self.received > 0
    }
}

/// Outcome of one transmit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxSummary {
    pub sent: u8,
    pub send_failures: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingEvents {
    brake_fault: bool,
    motor_cutoff: bool,
    lidar_warning: bool,
}

#[derive(Debug)]
pub struct MessageRouter {
    config: RouterConfig,
    codec: E2eCodec,
    last_rx_alive: [u8; 4],
    hb_cycle_count: u16,
    pending: PendingEvents,
    stats: RouterStats,
    last_tx: [Option<Frame>; 4],
}

impl MessageRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            codec: E2eCodec::new(),
            last_rx_alive: [ALIVE_UNSET; 4],
            hb_cycle_count: 0,
            pending: PendingEvents::default(),
            stats: RouterStats::default(),
            last_tx: [None; 4],
        }
    }

    /// Receive phase, 10 ms.
    pub fn receive<T, B>(&mut self, transport: &mut T, bus: &mut B) -> RxSummary
    where
        T: MessageTransport,
        B: SignalBus,
    {
        let mut summary = RxSummary::default();

        for pdu in RxPdu::ALL {
            let Some(frame) = transport.receive(pdu) else {
                continue;
            };
            summary.received += 1;
            self.stats.frames_received = self.stats.frames_received.wrapping_add(1);

            match self.codec.verify(&frame, pdu.data_id()) {
                Ok(alive) => {
                    self.last_rx_alive[pdu.index()] = alive;
                    Self::publish(pdu, &frame, bus);
                }
                Err(e) => {
                    warn!(?pdu, error = %e, "E2E check failed");
                    summary.e2e_failures += 1;
                    self.stats.e2e_failures = self.stats.e2e_failures.wrapping_add(1);
                    if Self::publish_safe_default(pdu, bus) {
                        self.stats.safe_defaults_applied =
                            self.stats.safe_defaults_applied.wrapping_add(1);
                    }
                }
            }
        }

        summary
    }

    fn publish<B: SignalBus>(pdu: RxPdu, frame: &Frame, bus: &mut B) {
        match pdu {
            RxPdu::EmergencyStop => {
                bus.write(SIG_ESTOP_ACTIVE, u32::from(protocol::estop_request(frame)))
            }
            RxPdu::VehicleState => {
                bus.write(SIG_VEHICLE_STATE, u32::from(protocol::vehicle_state_raw(frame)))
            }
            RxPdu::BrakeCommand => bus.write(SIG_BRAKE_CMD, u32::from(protocol::brake_command(frame))),
            RxPdu::SteerCommand => bus.write(SIG_STEER_CMD, protocol::steer_command(frame).to_signal()),
        }
    }

    /// Returns false for kinds without a safe default.
    fn publish_safe_default<B: SignalBus>(pdu: RxPdu, bus: &mut B) -> bool {
        match pdu {
            RxPdu::EmergencyStop => bus.write(SIG_ESTOP_ACTIVE, 1),
            RxPdu::BrakeCommand => bus.write(SIG_BRAKE_CMD, BrakePercent::FULL.to_signal()),
            RxPdu::SteerCommand => bus.write(SIG_STEER_CMD, SteerDegrees::CENTER.to_signal()),
            RxPdu::VehicleState => return false,
        }
        true
    }

    /// Transmit phase, 10 ms.
    pub fn transmit_schedule<T, B>(&mut self, transport: &mut T, bus: &B) -> TxSummary
    where
        T: MessageTransport,
        B: SignalBus,
    {
        let mut summary = TxSummary::default();

        self.hb_cycle_count = self.hb_cycle_count.saturating_add(1);
        if self.hb_cycle_count >= self.config.heartbeat_period_cycles() {
            self.hb_cycle_count = 0;
            let mask = FaultMask::from_bits(bus.read(SIG_FAULT_MASK) as u16);
            let frame = heartbeat_payload(bus.read(SIG_VEHICLE_STATE) as u8, mask);
            self.send(TxPdu::Heartbeat, frame, transport, &mut summary);
        }

        let brake_fault = bus.read(SIG_BRAKE_FAULT);
        if brake_fault != 0 {
            self.pending.brake_fault = true;
        }
        if self.pending.brake_fault {
            self.send(TxPdu::BrakeFault, brake_fault_payload(brake_fault as u8), transport, &mut summary);
            self.pending.brake_fault = false;
        }

        let cutoff = bus.read(SIG_MOTOR_CUTOFF);
        if cutoff != 0 {
            self.pending.motor_cutoff = true;
        }
        if self.pending.motor_cutoff {
            self.send(TxPdu::MotorCutoff, motor_cutoff_payload(cutoff as u8), transport, &mut summary);
            self.pending.motor_cutoff = false;
        }

        let zone = bus.read(SIG_LIDAR_ZONE);
        if zone >= u32::from(LidarZone::Warning.as_raw()) {
            self.pending.lidar_warning = true;
        }
        if self.pending.lidar_warning {
            let distance = bus.read(SIG_LIDAR_DIST) as u16;
            self.send(
                TxPdu::LidarWarning,
                lidar_warning_payload(zone as u8, distance),
                transport,
                &mut summary,
            );
            self.pending.lidar_warning = false;
        }

        summary
    }

    fn send<T: MessageTransport>(
        &mut self,
        pdu: TxPdu,
        mut frame: Frame,
        transport: &mut T,
        summary: &mut TxSummary,
    ) {
        if let Err(e) = self.codec.protect(&mut frame, pdu.data_id()) {
            warn!(?pdu, error = %e, "E2E protect failed");
            return;
        }
        self.last_tx[pdu.index()] = Some(frame);

        match transport.send(pdu, &frame) {
            Ok(()) => {
                debug!(?pdu, alive = frame[1] & 0x0F, "sent");
                summary.sent += 1;
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
            }
            Err(e) => {
                debug!(?pdu, error = %e, "send failed");
                summary.send_failures += 1;
                self.stats.send_failures = self.stats.send_failures.wrapping_add(1);
            }
        }
    }

    /// Last verified alive nibble of an inbound kind, `ALIVE_UNSET` before the first.
    pub fn last_rx_alive(&self, pdu: RxPdu) -> u8 {
        self.last_rx_alive[pdu.index()]
    }

    pub fn last_tx_frame(&self, pdu: TxPdu) -> Option<&Frame> {
        self.last_tx[pdu.index()].as_ref()
    }

    pub fn tx_alive(&self) -> u8 {
        self.codec.tx_alive()
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_period_in_cycles() {
        assert_eq!(RouterConfig::default().heartbeat_period_cycles(), 5);
    }

    #[test]
    fn alive_starts_unset() {
        let router = MessageRouter::new(RouterConfig::default());
        for pdu in RxPdu::ALL {
            assert_eq!(router.last_rx_alive(pdu), ALIVE_UNSET);
        }
        assert!(router.last_tx_frame(TxPdu::Heartbeat).is_none());
    }
}
