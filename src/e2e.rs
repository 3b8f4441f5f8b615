//! End-to-end protection for 8-byte bus payloads.
//!
//! Layout of a protected payload:
//!
//! ```text
//! byte 0      CRC-8 (SAE J1850 polynomial 0x1D) over bytes 1..len
//! byte 1      bits 3..0 alive counter, bits 7..4 application owned
//! byte 2..    application payload
//! ```
//!
//! The CRC register is seeded with `0xFF ^ data_id`, processed MSB first with
//! no reflection and no final XOR.

use thiserror::Error;

pub const CRC8_POLY: u8 = 0x1D;
pub const CRC8_INIT: u8 = 0xFF;
pub const ALIVE_MASK: u8 = 0x0F;

/// Smallest payload that can carry the CRC and alive bytes.
pub const MIN_PROTECTED_LEN: usize = 2;

/// Value stored as "last accepted alive" before any frame arrives.
pub const ALIVE_UNSET: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum E2eError {
    #[error("payload of {len} bytes is too short for E2E protection")]
    PayloadTooShort { len: usize },
    #[error("CRC mismatch: received {received:#04x}, computed {computed:#04x}")]
    CrcMismatch { received: u8, computed: u8 },
}

/// Bitwise CRC-8 with polynomial 0x1D.
pub fn crc8(data: &[u8], seed: u8) -> u8 {
    let mut crc = seed;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn payload_crc(payload: &[u8], data_id: u8) -> u8 {
    crc8(&payload[1..], CRC8_INIT ^ data_id)
}

/// Alive nibble carried in byte 1 of a protected payload.
pub fn alive_of(payload: &[u8]) -> Option<u8> {
    payload.get(1).map(|b| b & ALIVE_MASK)
}

/// Protects outbound payloads and verifies inbound ones.
///
/// A single TX alive counter is shared by every outbound message kind, so
/// consecutive protected frames carry consecutive nibbles regardless of
/// which message they belong to.
#[derive(Debug, Clone, Default)]
pub struct E2eCodec {
    tx_alive: u8,
}

impl E2eCodec {
    pub fn new() -> Self {
        Self { tx_alive: 0 }
    }

    /// Alive nibble the next `protect` call will stamp.
    pub fn tx_alive(&self) -> u8 {
        self.tx_alive
    }

    pub fn protect(&mut self, payload: &mut [u8], data_id: u8) -> Result<(), E2eError> {
        if payload.len() < MIN_PROTECTED_LEN {
            return Err(E2eError::PayloadTooShort { len: payload.len() });
        }

        payload[1] = (payload[1] & !ALIVE_MASK) | (self.tx_alive & ALIVE_MASK);
        payload[0] = payload_crc(payload, data_id);
        self.tx_alive = (self.tx_alive + 1) & ALIVE_MASK;

        Ok(())
    }

    /// Checks the CRC and returns the received alive nibble.
    ///
    /// Repeated or skipped alive values are not rejected here.
    pub fn verify(&self, payload: &[u8], data_id: u8) -> Result<u8, E2eError> {
        if payload.len() < MIN_PROTECTED_LEN {
            return Err(E2eError::PayloadTooShort { len: payload.len() });
        }

        let received = payload[0];
        let computed = payload_crc(payload, data_id);
        if received != computed {
            return Err(E2eError::CrcMismatch { received, computed });
        }

        Ok(payload[1] & ALIVE_MASK)
    }
}
