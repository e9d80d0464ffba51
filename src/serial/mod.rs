//! Host serial link: byte-stuffed framing, serial packets, the system
//! sub-protocol, and the application multiplexer on top of them.

mod api;
mod framer;
mod packet;
mod system;

pub use api::SerialApi;
pub use framer::{encode, DecoderState, SerialDecoder, ESC, RX_BUFFER_SIZE, START, STOP};
pub use packet::{PayloadType, SerialHeader, SerialPacket, MAX_SERIAL_PAYLOAD, SERIAL_HEADER_SIZE};
pub use system::{AllSettings, Heartbeat, SystemPacket, SystemPacketType, MAX_SYSTEM_BODY};
