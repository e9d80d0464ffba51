//! Serial application multiplexer.
//!
//! Outbound, each `send_*` call tags its payload, assigns the next packet
//! id, byte-stuffs the frame and hands it to the writer task.
//!
//! Inbound, decoded frame bodies wait in the receive queue filled by the
//! serial reader task. The two poppers sweep that queue:
//! - [`SerialApi::pop_wireless_packet`] returns the first wireless frame and
//!   parks system frames met on the way
//! - [`SerialApi::pop_system_packet`] returns parked system frames first,
//!   then sweeps, parking wireless frames for the wireless popper
//!
//! Log, null, unknown and malformed frames are dropped during a sweep.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use super::framer::encode;
use super::packet::{PayloadType, SerialPacket, MAX_SERIAL_PAYLOAD};
use super::system::SystemPacket;
use crate::config::{DEFAULT_MAX_SERIAL_FRAME_SIZE, DEFAULT_SERIAL_QUEUE_CAPACITY};
use crate::error::{DongleError, Result};
use crate::queue::LossyQueue;
use crate::writer::WriterHandle;

/// Serial application layer shared by the dongle tasks.
pub struct SerialApi {
    writer: WriterHandle,
    /// Decoded frame bodies from the reader task.
    rx_frames: LossyQueue<Bytes>,
    /// System packets found by a wireless sweep.
    system_packets: LossyQueue<SystemPacket>,
    /// Wireless payloads found by a system sweep.
    wireless_packets: LossyQueue<SerialPacket>,
    next_packet_id: AtomicU16,
    max_frame_size: usize,
    overflow: Arc<AtomicU64>,
}

impl SerialApi {
    /// Create a multiplexer with default queue sizes.
    pub fn new(writer: WriterHandle) -> Self {
        Self::with_limits(
            writer,
            DEFAULT_SERIAL_QUEUE_CAPACITY,
            DEFAULT_MAX_SERIAL_FRAME_SIZE,
        )
    }

    /// Create a multiplexer with custom queue capacity and frame limit.
    pub fn with_limits(writer: WriterHandle, queue_capacity: usize, max_frame_size: usize) -> Self {
        let overflow = Arc::new(AtomicU64::new(0));
        Self {
            writer,
            rx_frames: LossyQueue::new("serial rx", queue_capacity, overflow.clone()),
            system_packets: LossyQueue::new("system packet", queue_capacity, overflow.clone()),
            wireless_packets: LossyQueue::new("serial wireless", queue_capacity, overflow.clone()),
            next_packet_id: AtomicU16::new(0),
            max_frame_size,
            overflow,
        }
    }

    /// Hand over a decoded frame body. Dropped if the receive queue is full.
    pub fn deliver_frame(&self, body: Bytes) -> bool {
        self.rx_frames.push(body)
    }

    /// Send a text log message to the host.
    pub fn send_log(&self, text: &str) -> Result<()> {
        self.send(PayloadType::Log, text.as_bytes())
    }

    /// Forward a wireless packet (header + payload, no CRC) to the host.
    pub fn send_wireless_packet(&self, packet: &[u8]) -> Result<()> {
        self.send(PayloadType::Wireless, packet)
    }

    /// Send a system packet to the host.
    pub fn send_system_packet(&self, packet: &SystemPacket) -> Result<()> {
        self.send(PayloadType::System, &packet.to_bytes())
    }

    fn send(&self, payload_type: PayloadType, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_SERIAL_PAYLOAD {
            return Err(DongleError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_SERIAL_PAYLOAD,
            });
        }
        let packet_id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        let packet = SerialPacket::new(packet_id, payload_type, payload)?;
        let frame = encode(&packet.to_bytes(), self.max_frame_size)?;
        tracing::trace!(
            "Serial tx packet {} type {:?} ({} bytes)",
            packet_id,
            payload_type,
            payload.len()
        );
        self.writer.try_send(frame)
    }

    /// Next wireless payload sent by the host, if any.
    pub fn pop_wireless_packet(&self) -> Option<SerialPacket> {
        if let Some(packet) = self.wireless_packets.try_pop() {
            return Some(packet);
        }
        while let Some(body) = self.rx_frames.try_pop() {
            let Some(packet) = parse_frame(&body) else {
                continue;
            };
            match packet.kind() {
                Some(PayloadType::Wireless) => return Some(packet),
                Some(PayloadType::System) => self.park_system(&packet),
                other => tracing::debug!("Dropping serial frame of type {:?}", other),
            }
        }
        None
    }

    /// Next system packet sent by the host, if any.
    pub fn pop_system_packet(&self) -> Option<SystemPacket> {
        if let Some(packet) = self.system_packets.try_pop() {
            return Some(packet);
        }
        while let Some(body) = self.rx_frames.try_pop() {
            let Some(packet) = parse_frame(&body) else {
                continue;
            };
            match packet.kind() {
                Some(PayloadType::System) => match SystemPacket::parse(&packet.payload) {
                    Ok(system) => return Some(system),
                    Err(e) => tracing::debug!("Dropping system frame: {}", e),
                },
                Some(PayloadType::Wireless) => {
                    self.wireless_packets.push(packet);
                }
                other => tracing::debug!("Dropping serial frame of type {:?}", other),
            }
        }
        None
    }

    fn park_system(&self, packet: &SerialPacket) {
        match SystemPacket::parse(&packet.payload) {
            Ok(system) => {
                self.system_packets.push(system);
            }
            Err(e) => tracing::debug!("Dropping system frame: {}", e),
        }
    }

    /// Number of serial frames dropped on full queues.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Writer handle used for outbound frames.
    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }
}

fn parse_frame(body: &Bytes) -> Option<SerialPacket> {
    match SerialPacket::parse(body) {
        Ok(packet) => Some(packet),
        Err(e) => {
            tracing::debug!("Dropping serial frame: {}", e);
            None
        }
    }
}
