//! Protocol module - wireless wire format, CRC and packet types.
//!
//! This module implements the LoRaHome radio frame:
//! - 8-byte header encoding/decoding
//! - CRC16-CCITT computation and validation
//! - Packet struct with serialization, plus ack frames

mod crc;
mod frame;
mod wire_format;

pub use crc::{crc16, validate};
pub use frame::{gateway_ack, serialize_ack, Packet};
pub use wire_format::{
    is_valid_frame_len, MessageType, PacketHeader, ACK_FRAME_SIZE, FOOTER_SIZE, HEADER_SIZE,
    MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE, NODE_ID_BROADCAST, NODE_ID_GATEWAY,
    PAYLOAD_SIZE_INDEX,
};
