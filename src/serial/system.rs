//! System (control) sub-protocol carried in `System` serial packets.
//!
//! The first payload byte is the sub-type; the rest (at most 127 bytes) is
//! sub-type specific:
//!
//! | Sub-type              | Code | Body                                        |
//! |-----------------------|------|---------------------------------------------|
//! | heartbeat             | 1    | rx, tx, err counters (u32 LE each)          |
//! | echo                  | 2    | opaque                                      |
//! | info                  | 3    | firmware name and version text              |
//! | set-radio-settings    | 4    | channel, bandwidth, SF, CR codes            |
//! | get-all-settings      | 5    | empty                                       |
//! | all-settings-info     | 6    | version triplet, radio codes, network id LE |
//! | set-network-id        | 7    | network id (u16 LE)                         |
//! | reset                 | 254  | empty                                       |

use bytes::Bytes;

use super::packet::MAX_SERIAL_PAYLOAD;
use crate::config::RadioConfig;
use crate::error::{DongleError, Result};

/// Largest sub-type body.
pub const MAX_SYSTEM_BODY: usize = MAX_SERIAL_PAYLOAD - 1;

/// System packet sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemPacketType {
    Heartbeat = 1,
    Echo = 2,
    Info = 3,
    SetRadioSettings = 4,
    GetAllSettings = 5,
    AllSettingsInfo = 6,
    SetNetworkId = 7,
    Reset = 254,
}

impl SystemPacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Echo),
            3 => Some(Self::Info),
            4 => Some(Self::SetRadioSettings),
            5 => Some(Self::GetAllSettings),
            6 => Some(Self::AllSettingsInfo),
            7 => Some(Self::SetNetworkId),
            254 => Some(Self::Reset),
            _ => None,
        }
    }
}

/// A system packet: sub-type byte plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPacket {
    /// Raw sub-type byte.
    pub sys_type: u8,
    pub body: Bytes,
}

impl SystemPacket {
    /// Build a packet; the body must fit in 127 bytes.
    pub fn new(sys_type: SystemPacketType, body: &[u8]) -> Result<Self> {
        if body.len() > MAX_SYSTEM_BODY {
            return Err(DongleError::PayloadTooLarge {
                size: body.len(),
                max: MAX_SYSTEM_BODY,
            });
        }
        Ok(Self {
            sys_type: sys_type as u8,
            body: Bytes::copy_from_slice(body),
        })
    }

    /// Split a serial payload into sub-type and body.
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let (&sys_type, _) = payload
            .split_first()
            .ok_or_else(|| DongleError::Protocol("Empty system packet".to_string()))?;
        Ok(Self {
            sys_type,
            body: payload.slice(1..),
        })
    }

    #[inline]
    pub fn kind(&self) -> Option<SystemPacketType> {
        SystemPacketType::from_u8(self.sys_type)
    }

    /// Sub-type byte followed by the body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.body.len());
        buf.push(self.sys_type);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Heartbeat telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub rx_counter: u32,
    pub tx_counter: u32,
    pub err_counter: u32,
}

impl Heartbeat {
    pub const ENCODED_SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.rx_counter.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tx_counter.to_le_bytes());
        buf[8..12].copy_from_slice(&self.err_counter.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::ENCODED_SIZE {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Some(Self {
            rx_counter: word(0),
            tx_counter: word(4),
            err_counter: word(8),
        })
    }

    /// Wrap into a system packet.
    pub fn to_packet(&self) -> SystemPacket {
        SystemPacket {
            sys_type: SystemPacketType::Heartbeat as u8,
            body: Bytes::copy_from_slice(&self.encode()),
        }
    }
}

/// Body of an all-settings-info packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllSettings {
    pub version: (u8, u8, u8),
    pub radio: RadioConfig,
    pub network_id: u16,
}

impl AllSettings {
    pub const ENCODED_SIZE: usize = 3 + RadioConfig::ENCODED_SIZE + 2;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0] = self.version.0;
        buf[1] = self.version.1;
        buf[2] = self.version.2;
        buf[3..7].copy_from_slice(&self.radio.encode());
        buf[7..9].copy_from_slice(&self.network_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(DongleError::Protocol(format!(
                "All-settings body needs {} bytes, got {}",
                Self::ENCODED_SIZE,
                buf.len()
            )));
        }
        Ok(Self {
            version: (buf[0], buf[1], buf[2]),
            radio: RadioConfig::decode(&buf[3..7])?,
            network_id: u16::from_le_bytes([buf[7], buf[8]]),
        })
    }

    /// Wrap into a system packet.
    pub fn to_packet(&self) -> SystemPacket {
        SystemPacket {
            sys_type: SystemPacketType::AllSettingsInfo as u8,
            body: Bytes::copy_from_slice(&self.encode()),
        }
    }
}
