use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

use crate::safety::FaultMask;
use crate::signals::{BrakePercent, SteerDegrees};

/// Every PDU on the zone bus is a classic 8-byte CAN frame.
pub const FRAME_LEN: usize = 8;
pub type Frame = [u8; FRAME_LEN];

/// First application byte of a protected frame.
pub const PAYLOAD_OFFSET: usize = 2;

/// Identifier this controller puts in its heartbeat.
pub const ECU_ID: u8 = 0x02;

const_assert!(PAYLOAD_OFFSET + 4 <= FRAME_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transmit buffer for PDU {0} is full")]
    BufferFull(u8),
    #[error("controller is not started")]
    ControllerStopped,
    #[error("PDU {0} is not configured")]
    UnknownPdu(u8),
}

/// Inbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RxPdu {
    EmergencyStop = 0,
    VehicleState = 1,
    SteerCommand = 2,
    BrakeCommand = 3,
}

impl RxPdu {
    pub const ALL: [RxPdu; 4] = [
        RxPdu::EmergencyStop,
        RxPdu::VehicleState,
        RxPdu::BrakeCommand,
        RxPdu::SteerCommand,
    ];

    pub fn pdu_id(self) -> u8 {
        self as u8
    }

    pub fn can_id(self) -> u16 {
        match self {
            RxPdu::EmergencyStop => 0x001,
            RxPdu::VehicleState => 0x100,
            RxPdu::SteerCommand => 0x102,
            RxPdu::BrakeCommand => 0x103,
        }
    }

    pub fn data_id(self) -> u8 {
        match self {
            RxPdu::EmergencyStop => 0x01,
            RxPdu::VehicleState => 0x10,
            RxPdu::SteerCommand => 0x12,
            RxPdu::BrakeCommand => 0x13,
        }
    }

    /// Slot in per-kind bookkeeping arrays.
    pub fn index(self) -> usize {
        usize::from(self.pdu_id())
    }
}

/// Outbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxPdu {
    Heartbeat = 0,
    BrakeFault = 3,
    MotorCutoff = 4,
    LidarWarning = 5,
}

impl TxPdu {
    pub const ALL: [TxPdu; 4] = [
        TxPdu::Heartbeat,
        TxPdu::BrakeFault,
        TxPdu::MotorCutoff,
        TxPdu::LidarWarning,
    ];

    pub fn pdu_id(self) -> u8 {
        self as u8
    }

    pub fn can_id(self) -> u16 {
        match self {
            TxPdu::Heartbeat => 0x011,
            TxPdu::BrakeFault => 0x210,
            TxPdu::MotorCutoff => 0x211,
            TxPdu::LidarWarning => 0x220,
        }
    }

    pub fn data_id(self) -> u8 {
        match self {
            TxPdu::Heartbeat => 0x11,
            // brake fault and motor cutoff share the brake status id
            TxPdu::BrakeFault | TxPdu::MotorCutoff => 0x21,
            TxPdu::LidarWarning => 0x22,
        }
    }

    pub fn index(self) -> usize {
        match self {
            TxPdu::Heartbeat => 0,
            TxPdu::BrakeFault => 1,
            TxPdu::MotorCutoff => 2,
            TxPdu::LidarWarning => 3,
        }
    }
}

/// Frame exchange with the bus stack. Neither call may block.
pub trait MessageTransport {
    fn receive(&mut self, pdu: RxPdu) -> Option<Frame>;
    fn send(&mut self, pdu: TxPdu, frame: &Frame) -> Result<(), TransportError>;
}

// ---- inbound payload accessors (call only after E2E verification) ----

/// Raw request byte; any non-zero value asks for a stop.
pub fn estop_request(frame: &Frame) -> u8 {
    frame[PAYLOAD_OFFSET]
}

pub fn vehicle_state_raw(frame: &Frame) -> u8 {
    frame[PAYLOAD_OFFSET]
}

pub fn brake_command(frame: &Frame) -> u8 {
    frame[PAYLOAD_OFFSET]
}

pub fn steer_command(frame: &Frame) -> SteerDegrees {
    SteerDegrees::from_le_bytes([frame[PAYLOAD_OFFSET], frame[PAYLOAD_OFFSET + 1]])
}

// ---- outbound payload builders (CRC and alive bytes left zero) ----

pub fn heartbeat_payload(vehicle_state: u8, fault_mask: FaultMask) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    let mask = fault_mask.bits().to_le_bytes();
    frame[2] = ECU_ID;
    frame[3] = vehicle_state;
    frame[4] = mask[0];
    frame[5] = mask[1];
    frame
}

pub fn brake_fault_payload(fault_code: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[2] = fault_code;
    frame
}

pub fn motor_cutoff_payload(request: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[2] = request;
    frame
}

pub fn lidar_warning_payload(zone: u8, distance_cm: u16) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    let distance = distance_cm.to_le_bytes();
    frame[2] = zone;
    frame[3] = distance[0];
    frame[4] = distance[1];
    frame
}

// ---- sender-side helpers, used by the SIL harness and tests ----

pub fn brake_command_payload(brake: BrakePercent) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[2] = brake.get();
    frame
}

pub fn steer_command_payload(angle: SteerDegrees) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    let bytes = angle.0.to_le_bytes();
    frame[2] = bytes[0];
    frame[3] = bytes[1];
    frame
}

pub fn single_byte_payload(value: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[2] = value;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_layout() {
        let frame = heartbeat_payload(1, FaultMask::from_bits(0x0124));
        assert_eq!(frame, [0, 0, ECU_ID, 1, 0x24, 0x01, 0, 0]);
    }

    #[test]
    fn lidar_warning_distance_is_little_endian() {
        let frame = lidar_warning_payload(2, 0x0132);
        assert_eq!(&frame[2..5], &[2, 0x32, 0x01]);
    }

    #[test]
    fn steer_command_round_trip_through_payload() {
        let frame = steer_command_payload(SteerDegrees(-30));
        assert_eq!(steer_command(&frame), SteerDegrees(-30));
    }

    #[test]
    fn data_ids_are_fixed() {
        assert_eq!(RxPdu::BrakeCommand.data_id(), 0x13);
        assert_eq!(RxPdu::SteerCommand.can_id(), 0x102);
        assert_eq!(TxPdu::MotorCutoff.data_id(), TxPdu::BrakeFault.data_id());
        assert_eq!(TxPdu::LidarWarning.pdu_id(), 5);
    }
}
