//! Gateway link engine.
//!
//! Owns the three bounded link queues and everything that touches the radio:
//!
//! ```text
//!              on_receive ──► classify ──┬─► inbound data ──► pop_packet
//!                                        ├─► inbound ack  ──► put_packet (ack wait)
//!                                        └─► ack emission ─┐
//! put_packet ──────────────────────────────────────────────┴─► outbound ──► send ──► radio
//! ```
//!
//! Every enqueue is non-blocking and drops on full. The only wait is the ack
//! wait inside [`GatewayLink::put_packet`], and reliable sends are serialized
//! so at most one exchange is waiting for an ack at any time.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use super::stats::LinkStats;
use crate::config::{LinkConfig, RadioConfig};
use crate::error::{DongleError, Result};
use crate::protocol::{
    gateway_ack, is_valid_frame_len, validate, MessageType, Packet, PacketHeader, ACK_FRAME_SIZE,
    FOOTER_SIZE, HEADER_SIZE, NODE_ID_GATEWAY, PAYLOAD_SIZE_INDEX,
};
use crate::queue::LossyQueue;
use crate::serial::MAX_SERIAL_PAYLOAD;
use crate::transport::Radio;

/// Pause between failed `begin` attempts.
pub const RADIO_BEGIN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Largest node payload that still fits a serial wireless packet
/// (header + payload, no CRC).
pub const MAX_FORWARDED_PAYLOAD: usize = MAX_SERIAL_PAYLOAD - HEADER_SIZE;

/// JSON key naming the recipient node in host documents.
pub const JSON_KEY_NODE: &str = "node";

/// Outcome of classifying one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Data packet queued for the host.
    Data,
    /// Data packet queued for the host and an ack queued for the node.
    DataAcked,
    /// Node ack queued for the reliable-send wait.
    Ack,
    /// Frame discarded.
    Dropped(DropReason),
}

/// Why a received frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Callbacks are detached.
    Disabled,
    /// Length outside the accepted frame bounds.
    Length,
    /// CRC mismatch. Counted as an error.
    Crc,
    /// Payload size field disagrees with the frame length. Counted as an error.
    SizeMismatch,
    /// Payload too large to forward to the host. Counted as an error and
    /// not acked.
    Oversize,
    /// Other network, or not addressed to the gateway.
    Address,
    /// Node ack with a payload.
    AckLength,
    /// Gateway ack heard by a gateway.
    GatewayAck,
    /// Unknown or gateway-originated message type. Counted as an error.
    UnknownType,
}

/// The radio side of the dongle.
pub struct GatewayLink<R: Radio> {
    radio: Mutex<R>,
    config: LinkConfig,
    network_id: AtomicU16,
    /// Counter stamped on gateway-originated packets.
    tx_counter: AtomicU16,
    enabled: AtomicBool,
    rx_packets: LossyQueue<Packet>,
    rx_acks: LossyQueue<PacketHeader>,
    tx_frames: LossyQueue<Bytes>,
    /// Signalled whenever a frame is queued for transmission.
    tx_ready: Notify,
    /// Serializes reliable sends.
    send_lock: tokio::sync::Mutex<()>,
    stats: LinkStats,
}

impl<R: Radio> GatewayLink<R> {
    /// Create a link around `radio`. Call [`setup`](Self::setup) before use.
    pub fn new(radio: R, config: LinkConfig) -> Self {
        let stats = LinkStats::new();
        let overflow = stats.overflow_counter();
        let capacity = config.queue_capacity;
        Self {
            radio: Mutex::new(radio),
            network_id: AtomicU16::new(config.network_id),
            tx_counter: AtomicU16::new(0),
            enabled: AtomicBool::new(false),
            rx_packets: LossyQueue::new("inbound data", capacity, overflow.clone()),
            rx_acks: LossyQueue::new("inbound ack", capacity, overflow.clone()),
            tx_frames: LossyQueue::new("outbound", capacity, overflow),
            tx_ready: Notify::new(),
            send_lock: tokio::sync::Mutex::new(()),
            stats,
            config,
        }
    }

    fn radio(&self) -> MutexGuard<'_, R> {
        // Radio calls do not leave the driver half-updated on panic
        self.radio.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start and configure the radio, attach callbacks, enter receive mode.
    ///
    /// `begin` is retried every 500 ms up to the configured attempt count.
    pub async fn setup(&self, radio_config: &RadioConfig) -> Result<()> {
        let frequency = radio_config.channel.frequency_hz();
        let attempts = self.config.radio_begin_attempts.max(1);
        let mut started = false;
        for attempt in 1..=attempts {
            let answered = self.radio().begin(frequency);
            if answered {
                started = true;
                break;
            }
            tracing::warn!("Radio begin failed (attempt {}/{})", attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(RADIO_BEGIN_RETRY_DELAY).await;
            }
        }
        if !started {
            return Err(DongleError::RadioInit(format!(
                "no answer from modem after {} attempts",
                attempts
            )));
        }

        {
            let mut radio = self.radio();
            radio.set_spreading_factor(radio_config.spreading_factor.value());
            radio.set_signal_bandwidth(radio_config.bandwidth.hz());
            radio.set_coding_rate4(radio_config.coding_rate.denominator());
            radio.enable_crc();
        }
        self.enable();
        self.radio().rx_mode();

        tracing::info!(
            "Radio ready: {} Hz, {} Hz bandwidth, SF{}, CR 4/{}",
            frequency,
            radio_config.bandwidth.hz(),
            radio_config.spreading_factor.value(),
            radio_config.coding_rate.denominator()
        );
        Ok(())
    }

    /// Detach, apply a new radio configuration, and re-attach.
    pub async fn reconfigure(&self, radio_config: &RadioConfig) -> Result<()> {
        self.disable();
        self.setup(radio_config).await
    }

    /// Attach the radio callbacks.
    pub fn enable(&self) {
        self.radio().enable_callbacks();
        self.enabled.store(true, Ordering::Release);
    }

    /// Detach the radio callbacks. Receive and transmit become no-ops.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.radio().disable_callbacks();
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn network_id(&self) -> u16 {
        self.network_id.load(Ordering::Relaxed)
    }

    pub fn set_network_id(&self, network_id: u16) {
        self.network_id.store(network_id, Ordering::Relaxed);
        tracing::info!("Network id set to {:#06x}", network_id);
    }

    /// Next counter for a gateway-originated packet.
    pub fn next_counter(&self) -> u16 {
        self.tx_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Receive callback: read `packet_size` bytes from the radio and
    /// classify them.
    pub fn on_receive(&self, packet_size: usize) -> Received {
        if !self.is_enabled() {
            return Received::Dropped(DropReason::Disabled);
        }
        self.stats.record_rx();

        let mut radio = self.radio();
        if !is_valid_frame_len(packet_size) {
            // Drain so the driver's read cursor stays aligned
            for _ in 0..packet_size {
                radio.read();
            }
            tracing::debug!("Dropping frame of invalid length {}", packet_size);
            return Received::Dropped(DropReason::Length);
        }
        let mut frame = Vec::with_capacity(packet_size);
        for _ in 0..packet_size {
            match radio.read() {
                Some(byte) => frame.push(byte),
                None => break,
            }
        }
        drop(radio);

        self.classify(&frame)
    }

    /// Classify a frame that has already been read from the radio.
    pub fn handle_frame(&self, frame: &[u8]) -> Received {
        if !self.is_enabled() {
            return Received::Dropped(DropReason::Disabled);
        }
        self.stats.record_rx();
        self.classify(frame)
    }

    fn classify(&self, frame: &[u8]) -> Received {
        if !is_valid_frame_len(frame.len()) {
            tracing::debug!("Dropping frame of invalid length {}", frame.len());
            return Received::Dropped(DropReason::Length);
        }
        if !validate(frame) {
            self.stats.record_error();
            tracing::debug!("CRC mismatch on {}-byte frame", frame.len());
            return Received::Dropped(DropReason::Crc);
        }

        let Some(header) = PacketHeader::decode(frame) else {
            return Received::Dropped(DropReason::Length);
        };
        if header.network_id != self.network_id() || !header.is_for_gateway() {
            tracing::trace!(
                "Ignoring frame for network {:#06x} node {:#04x}",
                header.network_id,
                header.recipient
            );
            return Received::Dropped(DropReason::Address);
        }

        match header.kind() {
            Some(MessageType::NodeMessageAck) => {
                let packet = match self.parse_data(frame) {
                    Ok(packet) => packet,
                    Err(reason) => return Received::Dropped(reason),
                };
                self.emit_ack(header.emitter, header.counter);
                self.rx_packets.push(packet);
                Received::DataAcked
            }
            Some(MessageType::NodeMessageNoAck) => {
                let packet = match self.parse_data(frame) {
                    Ok(packet) => packet,
                    Err(reason) => return Received::Dropped(reason),
                };
                self.rx_packets.push(packet);
                Received::Data
            }
            Some(MessageType::NodeAck) => {
                if frame.len() != ACK_FRAME_SIZE {
                    tracing::debug!("Node ack with invalid length {}", frame.len());
                    return Received::Dropped(DropReason::AckLength);
                }
                self.rx_acks.push(header);
                Received::Ack
            }
            Some(MessageType::GatewayAck) => {
                tracing::warn!("Gateway ack received from node {:#04x}", header.emitter);
                Received::Dropped(DropReason::GatewayAck)
            }
            _ => {
                self.stats.record_error();
                tracing::debug!("Unknown message type {:#04x}", header.message_type);
                Received::Dropped(DropReason::UnknownType)
            }
        }
    }

    fn parse_data(&self, frame: &[u8]) -> std::result::Result<Packet, DropReason> {
        let packet = Packet::parse(frame).map_err(|e| {
            self.stats.record_error();
            tracing::debug!("Dropping data frame: {}", e);
            DropReason::SizeMismatch
        })?;
        if packet.payload().len() > MAX_FORWARDED_PAYLOAD {
            self.stats.record_error();
            tracing::warn!(
                "Dropping {}-byte payload from node {:#04x}: host limit is {}",
                packet.payload().len(),
                packet.header.emitter,
                MAX_FORWARDED_PAYLOAD
            );
            return Err(DropReason::Oversize);
        }
        Ok(packet)
    }

    fn emit_ack(&self, recipient: u8, counter: u16) {
        let ack = gateway_ack(self.network_id(), recipient, counter);
        tracing::trace!("Ack to node {:#04x} for counter {}", recipient, counter);
        self.enqueue_tx(Bytes::copy_from_slice(&ack));
    }

    fn enqueue_tx(&self, frame: Bytes) -> bool {
        let queued = self.tx_frames.push(frame);
        if queued {
            self.tx_ready.notify_one();
        }
        queued
    }

    /// Next data packet received from a node, if any.
    pub fn pop_packet(&self) -> Option<Packet> {
        let packet = self.rx_packets.try_pop()?;
        self.stats.touch();
        Some(packet)
    }

    /// Reliable send.
    ///
    /// Queues the packet (CRC appended) and waits up to the ack timeout for
    /// an ack whose emitter and counter match the packet's recipient and
    /// counter, re-queueing the same frame until the attempt budget is spent.
    /// Returns the number of attempts used.
    ///
    /// A packet whose type does not ask for an ack is queued once and not
    /// waited on.
    pub async fn put_packet(&self, packet: Packet) -> Result<u8> {
        let _guard = self.send_lock.lock().await;

        let frame = Bytes::from(packet.serialize());
        let recipient = packet.header.recipient;
        let counter = packet.header.counter;

        if !packet.kind().is_some_and(MessageType::requires_ack) {
            if !self.enqueue_tx(frame) {
                return Err(DongleError::QueueFull("outbound"));
            }
            return Ok(1);
        }

        let max_retry = self.config.max_retry.max(1);
        for attempt in 1..=max_retry {
            if !self.enqueue_tx(frame.clone()) {
                tracing::debug!("Outbound queue full on attempt {}", attempt);
            }
            match self.rx_acks.pop_timeout(self.config.ack_timeout).await {
                Some(ack) if ack.emitter == recipient && ack.counter == counter => {
                    tracing::debug!(
                        "Ack from node {:#04x} for counter {} on attempt {}",
                        recipient,
                        counter,
                        attempt
                    );
                    return Ok(attempt);
                }
                Some(ack) => {
                    tracing::debug!(
                        "Discarding ack from node {:#04x} counter {} (waiting for {:#04x}/{})",
                        ack.emitter,
                        ack.counter,
                        recipient,
                        counter
                    );
                }
                None => {
                    tracing::debug!("No ack for counter {} (attempt {})", counter, attempt);
                }
            }
        }

        tracing::warn!(
            "Giving up on node {:#04x} counter {} after {} attempts",
            recipient,
            counter,
            max_retry
        );
        Err(DongleError::DeliveryFailed {
            recipient,
            counter,
            attempts: max_retry,
        })
    }

    /// Send a host JSON document to the node named by its `"node"` key.
    ///
    /// The key is removed, the rest becomes the payload of a
    /// gateway-message-with-ack packet, and the packet goes through
    /// [`put_packet`](Self::put_packet).
    pub async fn forward_json_to_node(&self, json: &str) -> Result<u8> {
        let mut doc: serde_json::Value = serde_json::from_str(json)?;
        let object = doc
            .as_object_mut()
            .ok_or_else(|| DongleError::Protocol("JSON document is not an object".to_string()))?;
        let recipient = object
            .remove(JSON_KEY_NODE)
            .and_then(|v| v.as_u64())
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| {
                DongleError::Protocol(format!("Missing or invalid \"{}\" key", JSON_KEY_NODE))
            })?;

        let payload = serde_json::to_vec(&doc)?;
        let packet = Packet::with_payload(
            NODE_ID_GATEWAY,
            recipient,
            MessageType::GatewayMessageAck,
            self.network_id(),
            self.next_counter(),
            &payload,
        )?;
        self.put_packet(packet).await
    }

    /// Transmit one queued frame, if any. Returns whether a frame was sent.
    ///
    /// Exactly header + declared payload + CRC bytes go out, bracketed by
    /// transmit and receive mode.
    pub fn send(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Some(frame) = self.tx_frames.try_pop() else {
            return false;
        };
        self.stats.record_tx();

        let declared = frame.get(PAYLOAD_SIZE_INDEX).copied().unwrap_or(0) as usize;
        let size = (HEADER_SIZE + declared + FOOTER_SIZE).min(frame.len());

        let mut radio = self.radio();
        radio.tx_mode();
        radio.begin_packet();
        radio.write(&frame[..size]);
        radio.flush();
        radio.end_packet();
        radio.rx_mode();
        true
    }

    /// Wait until a frame has been queued for transmission.
    pub async fn transmit_ready(&self) {
        self.tx_ready.notified().await;
    }

    /// Frames waiting for transmission.
    pub fn outbound_len(&self) -> usize {
        self.tx_frames.len()
    }

    /// Data packets waiting for the host.
    pub fn inbound_len(&self) -> usize {
        self.rx_packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{Bandwidth, Channel, CodingRate, SpreadingFactor};
    use crate::protocol::{serialize_ack, NODE_ID_BROADCAST};
    use crate::transport::{MemoryRadio, RadioMode};

    const NET: u16 = 0x1234;

    fn link() -> (GatewayLink<MemoryRadio>, MemoryRadio) {
        let radio = MemoryRadio::new();
        let config = LinkConfig {
            network_id: NET,
            ..LinkConfig::default()
        };
        let link = GatewayLink::new(radio.clone(), config);
        link.enable();
        (link, radio)
    }

    fn node_frame(kind: MessageType, recipient: u8, counter: u16, payload: &[u8]) -> Vec<u8> {
        Packet::with_payload(0x07, recipient, kind, NET, counter, payload)
            .unwrap()
            .serialize()
    }

    fn node_ack(emitter: u8, counter: u16) -> Vec<u8> {
        let header = PacketHeader::new(emitter, NODE_ID_GATEWAY, MessageType::NodeAck, NET, counter, 0);
        serialize_ack(&header).to_vec()
    }

    #[tokio::test]
    async fn test_setup_configures_radio() {
        let radio = MemoryRadio::new();
        let link = GatewayLink::new(radio.clone(), LinkConfig::default());
        let config = RadioConfig {
            channel: Channel::Ch1,
            bandwidth: Bandwidth::Bw250kHz,
            spreading_factor: SpreadingFactor::try_from(9).unwrap(),
            coding_rate: CodingRate::try_from(6).unwrap(),
        };
        link.setup(&config).await.unwrap();

        let state = radio.state();
        assert_eq!(state.frequency_hz, 868_100_000);
        assert_eq!(state.bandwidth_hz, 250_000);
        assert_eq!(state.spreading_factor, 9);
        assert_eq!(state.coding_rate, 6);
        assert!(state.crc_enabled);
        assert!(state.callbacks_enabled);
        assert_eq!(state.mode, RadioMode::Receive);
        assert!(!state.invert_iq);
        drop(state);
        assert!(link.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_retries_begin() {
        let radio = MemoryRadio::failing_begin(2);
        let link = GatewayLink::new(radio.clone(), LinkConfig::default());
        let start = tokio::time::Instant::now();
        link.setup(&RadioConfig::default()).await.unwrap();
        assert_eq!(radio.state().begin_calls, 3);
        assert!(start.elapsed() >= RADIO_BEGIN_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_gives_up() {
        let radio = MemoryRadio::failing_begin(100);
        let config = LinkConfig {
            radio_begin_attempts: 3,
            ..LinkConfig::default()
        };
        let link = GatewayLink::new(radio.clone(), config);
        let result = link.setup(&RadioConfig::default()).await;
        assert!(matches!(result, Err(DongleError::RadioInit(_))));
        assert_eq!(radio.state().begin_calls, 3);
        assert!(!link.is_enabled());
    }

    #[tokio::test]
    async fn test_reconfigure_applies_new_settings() {
        let (link, radio) = link();
        link.setup(&RadioConfig::default()).await.unwrap();
        let config = RadioConfig {
            channel: Channel::Ch8,
            ..RadioConfig::default()
        };
        link.reconfigure(&config).await.unwrap();
        assert_eq!(radio.state().frequency_hz, 867_900_000);
        assert!(link.is_enabled());
    }

    #[test]
    fn test_ack_required_message_is_acked_and_queued() {
        let (link, _radio) = link();
        let frame = node_frame(MessageType::NodeMessageAck, NODE_ID_GATEWAY, 42, b"hello");

        assert_eq!(link.handle_frame(&frame), Received::DataAcked);
        assert_eq!(link.inbound_len(), 1);
        assert_eq!(link.outbound_len(), 1);

        let packet = link.pop_packet().unwrap();
        assert_eq!(packet.payload(), b"hello");
        assert_eq!(link.stats().rx_count(), 1);
        assert_eq!(link.stats().error_count(), 0);
    }

    #[test]
    fn test_payload_at_host_limit_is_acked() {
        let (link, _radio) = link();
        let payload = vec![b'a'; MAX_FORWARDED_PAYLOAD];
        let frame = node_frame(MessageType::NodeMessageAck, NODE_ID_GATEWAY, 5, &payload);

        assert_eq!(link.handle_frame(&frame), Received::DataAcked);
        assert_eq!(link.outbound_len(), 1);
        let packet = link.pop_packet().unwrap();
        assert_eq!(packet.to_unsigned().len(), MAX_SERIAL_PAYLOAD);
    }

    #[test]
    fn test_payload_over_host_limit_is_refused() {
        let (link, _radio) = link();
        let payload = vec![b'a'; MAX_FORWARDED_PAYLOAD + 1];
        let frame = node_frame(MessageType::NodeMessageAck, NODE_ID_GATEWAY, 6, &payload);

        assert_eq!(link.handle_frame(&frame), Received::Dropped(DropReason::Oversize));
        assert_eq!(link.outbound_len(), 0);
        assert_eq!(link.inbound_len(), 0);
        assert_eq!(link.stats().error_count(), 1);

        let frame = node_frame(MessageType::NodeMessageNoAck, NODE_ID_GATEWAY, 7, &[0u8; 128]);
        assert_eq!(link.handle_frame(&frame), Received::Dropped(DropReason::Oversize));
        assert_eq!(link.stats().error_count(), 2);
    }

    #[test]
    fn test_no_ack_message_is_queued_only() {
        let (link, _radio) = link();
        let frame = node_frame(MessageType::NodeMessageNoAck, NODE_ID_BROADCAST, 1, b"x");
        assert_eq!(link.handle_frame(&frame), Received::Data);
        assert_eq!(link.inbound_len(), 1);
        assert_eq!(link.outbound_len(), 0);
    }

    #[test]
    fn test_crc_failure_counts_error() {
        let (link, _radio) = link();
        let mut frame = node_frame(MessageType::NodeMessageAck, NODE_ID_GATEWAY, 1, b"hello");
        frame[HEADER_SIZE] ^= 0x01;

        assert_eq!(link.handle_frame(&frame), Received::Dropped(DropReason::Crc));
        assert_eq!(link.stats().error_count(), 1);
        assert_eq!(link.inbound_len(), 0);
        assert_eq!(link.outbound_len(), 0);
    }

    #[test]
    fn test_addressing_drops_silently() {
        let (link, _radio) = link();
        let other_node = node_frame(MessageType::NodeMessageNoAck, 0x09, 1, b"x");
        assert_eq!(link.handle_frame(&other_node), Received::Dropped(DropReason::Address));

        let other_net = Packet::with_payload(7, 0, MessageType::NodeMessageNoAck, NET + 1, 1, b"x")
            .unwrap()
            .serialize();
        assert_eq!(link.handle_frame(&other_net), Received::Dropped(DropReason::Address));

        assert_eq!(link.stats().rx_count(), 2);
        assert_eq!(link.stats().error_count(), 0);
        assert_eq!(link.inbound_len(), 0);
    }

    #[test]
    fn test_unknown_and_gateway_types() {
        let (link, _radio) = link();
        let mut header = PacketHeader::new(7, 0, MessageType::NodeAck, NET, 1, 0);
        header.message_type = 0x05;
        assert_eq!(
            link.handle_frame(&serialize_ack(&header)),
            Received::Dropped(DropReason::UnknownType)
        );
        assert_eq!(link.stats().error_count(), 1);

        let gw_ack = gateway_ack(NET, NODE_ID_GATEWAY, 1);
        assert_eq!(link.handle_frame(&gw_ack), Received::Dropped(DropReason::GatewayAck));
        assert_eq!(link.stats().error_count(), 1);

        let gw_msg = node_frame(MessageType::GatewayMessageAck, NODE_ID_GATEWAY, 1, b"x");
        assert_eq!(link.handle_frame(&gw_msg), Received::Dropped(DropReason::UnknownType));
        assert_eq!(link.stats().error_count(), 2);
    }

    #[test]
    fn test_node_ack_length_checked() {
        let (link, _radio) = link();
        assert_eq!(link.handle_frame(&node_ack(7, 3)), Received::Ack);

        let with_payload = node_frame(MessageType::NodeAck, NODE_ID_GATEWAY, 3, b"zz");
        assert_eq!(
            link.handle_frame(&with_payload),
            Received::Dropped(DropReason::AckLength)
        );
        assert_eq!(link.stats().error_count(), 0);
    }

    #[test]
    fn test_size_field_mismatch_counts_error() {
        let (link, _radio) = link();
        let mut frame = PacketHeader::new(7, 0, MessageType::NodeMessageNoAck, NET, 1, 9)
            .encode()
            .to_vec();
        frame.extend_from_slice(b"abc");
        let crc = crate::protocol::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        assert_eq!(link.handle_frame(&frame), Received::Dropped(DropReason::SizeMismatch));
        assert_eq!(link.stats().error_count(), 1);
    }

    #[test]
    fn test_on_receive_reads_from_radio() {
        let (link, radio) = link();
        let frame = node_frame(MessageType::NodeMessageNoAck, NODE_ID_GATEWAY, 5, b"abc");
        radio.inject(&frame);
        assert_eq!(link.on_receive(frame.len()), Received::Data);
        assert_eq!(radio.pending_rx(), 0);
    }

    #[test]
    fn test_on_receive_drains_invalid_length() {
        let (link, radio) = link();
        radio.inject(&[0u8; 4]);
        radio.inject(&[0u8; 200]);

        assert_eq!(link.on_receive(4), Received::Dropped(DropReason::Length));
        assert_eq!(radio.pending_rx(), 200);
        assert_eq!(link.on_receive(200), Received::Dropped(DropReason::Length));
        assert_eq!(radio.pending_rx(), 0);

        assert_eq!(link.stats().rx_count(), 2);
        assert_eq!(link.stats().error_count(), 0);
    }

    #[test]
    fn test_disabled_link_ignores_traffic() {
        let (link, radio) = link();
        link.disable();
        let frame = node_frame(MessageType::NodeMessageNoAck, NODE_ID_GATEWAY, 5, b"abc");
        radio.inject(&frame);
        assert_eq!(link.on_receive(frame.len()), Received::Dropped(DropReason::Disabled));
        assert_eq!(link.stats().rx_count(), 0);
        assert!(!link.send());
    }

    #[test]
    fn test_inbound_overflow_keeps_oldest() {
        let (link, _radio) = link();
        for counter in 0..7u16 {
            let frame = node_frame(MessageType::NodeMessageNoAck, NODE_ID_GATEWAY, counter, b"x");
            link.handle_frame(&frame);
        }
        assert_eq!(link.stats().overflow_count(), 2);
        assert_eq!(link.stats().error_count(), 0);
        for counter in 0..5u16 {
            assert_eq!(link.pop_packet().unwrap().header.counter, counter);
        }
        assert!(link.pop_packet().is_none());
    }

    #[test]
    fn test_send_writes_exact_frame_in_tx_mode() {
        let (link, radio) = link();
        let frame = node_frame(MessageType::NodeMessageAck, NODE_ID_GATEWAY, 0x0102, b"hi");
        link.handle_frame(&frame);

        assert!(link.send());
        assert!(!link.send());

        let sent = radio.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], gateway_ack(NET, 0x07, 0x0102).to_vec());
        assert_eq!(radio.state().sent_inverted, vec![true]);
        assert_eq!(radio.state().mode, RadioMode::Receive);
        assert!(!radio.state().invert_iq);
        assert_eq!(link.stats().tx_count(), 1);
    }

    fn spawn_drain(link: Arc<GatewayLink<MemoryRadio>>) {
        tokio::spawn(async move {
            loop {
                link.transmit_ready().await;
                while link.send() {}
            }
        });
    }

    fn gateway_packet(recipient: u8, counter: u16) -> Packet {
        Packet::with_payload(
            NODE_ID_GATEWAY,
            recipient,
            MessageType::GatewayMessageAck,
            NET,
            counter,
            b"{\"on\":1}",
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_packet_exhausts_retries() {
        let (link, radio) = link();
        let link = Arc::new(link);
        spawn_drain(link.clone());

        let start = tokio::time::Instant::now();
        let result = link.put_packet(gateway_packet(5, 77)).await;

        assert!(matches!(
            result,
            Err(DongleError::DeliveryFailed { recipient: 5, counter: 77, attempts: 3 })
        ));
        assert_eq!(radio.sent().len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(900));
        let expected = gateway_packet(5, 77).serialize();
        assert!(radio.sent().iter().all(|f| *f == expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_packet_succeeds_on_matching_ack() {
        let (link, radio) = link();
        let link = Arc::new(link);

        let sender = link.clone();
        let send = tokio::spawn(async move { sender.put_packet(gateway_packet(5, 9)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(link.send());
        link.handle_frame(&node_ack(5, 9));

        assert_eq!(send.await.unwrap().unwrap(), 1);
        assert_eq!(radio.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_packet_mismatched_ack_does_not_satisfy() {
        let (link, radio) = link();
        let link = Arc::new(link);

        let sender = link.clone();
        let send = tokio::spawn(async move { sender.put_packet(gateway_packet(5, 9)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(link.send());
        // Wrong counter, then wrong emitter
        link.handle_frame(&node_ack(5, 8));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(link.send());
        link.handle_frame(&node_ack(6, 9));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(link.send());
        link.handle_frame(&node_ack(5, 9));

        assert_eq!(send.await.unwrap().unwrap(), 3);
        assert_eq!(radio.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_put_packet_no_ack_type_sends_once() {
        let (link, _radio) = link();
        let packet =
            Packet::with_payload(0, 5, MessageType::GatewayMessageNoAck, NET, 1, b"x").unwrap();
        assert_eq!(link.put_packet(packet).await.unwrap(), 1);
        assert_eq!(link.outbound_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_json_to_node() {
        let (link, radio) = link();
        let link = Arc::new(link);
        spawn_drain(link.clone());
        link.next_counter();

        let result = link.forward_json_to_node(r#"{"node":4,"relay":true}"#).await;
        assert!(matches!(result, Err(DongleError::DeliveryFailed { recipient: 4, counter: 1, .. })));

        let sent = radio.sent();
        let packet = Packet::parse(&sent[0]).unwrap();
        assert_eq!(packet.header.recipient, 4);
        assert_eq!(packet.header.emitter, NODE_ID_GATEWAY);
        assert_eq!(packet.kind(), Some(MessageType::GatewayMessageAck));
        assert_eq!(packet.payload(), br#"{"relay":true}"#);
    }

    #[tokio::test]
    async fn test_forward_json_rejects_bad_documents() {
        let (link, _radio) = link();
        assert!(matches!(
            link.forward_json_to_node("not json").await,
            Err(DongleError::Json(_))
        ));
        assert!(matches!(
            link.forward_json_to_node(r#"{"relay":true}"#).await,
            Err(DongleError::Protocol(_))
        ));
        assert!(matches!(
            link.forward_json_to_node(r#"{"node":300}"#).await,
            Err(DongleError::Protocol(_))
        ));
        let big = format!(r#"{{"node":1,"data":"{}"}}"#, "a".repeat(200));
        assert!(matches!(
            link.forward_json_to_node(&big).await,
            Err(DongleError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_counter_wraps() {
        let (link, _radio) = link();
        link.tx_counter.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(link.next_counter(), u16::MAX);
        assert_eq!(link.next_counter(), 0);
    }

    #[test]
    fn test_network_id_update_applies_to_acks() {
        let (link, _radio) = link();
        link.set_network_id(0x4321);
        assert_eq!(link.network_id(), 0x4321);
        let old = node_frame(MessageType::NodeMessageNoAck, NODE_ID_GATEWAY, 1, b"x");
        assert_eq!(link.handle_frame(&old), Received::Dropped(DropReason::Address));
    }
}
