//! Radio transceiver collaborator.
//!
//! The link engine drives the modem through [`Radio`]; it owns no register
//! state itself. Driver glue implements the trait for the real chip and
//! calls [`GatewayLink::on_receive`](crate::gateway::GatewayLink::on_receive)
//! from its receive callback.
//!
//! [`MemoryRadio`] is an in-memory modem for host builds: it records every
//! transmitted frame and replays injected frames through `read`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// LoRa modem operations used by the gateway link.
pub trait Radio: Send + 'static {
    /// Start the modem on `frequency_hz`. Returns `false` if the chip did
    /// not answer.
    fn begin(&mut self, frequency_hz: u64) -> bool;

    fn set_spreading_factor(&mut self, sf: u8);

    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32);

    /// Coding rate 4/`denominator`.
    fn set_coding_rate4(&mut self, denominator: u8);

    fn enable_crc(&mut self);

    /// Attach the receive and transmit-done callbacks.
    fn enable_callbacks(&mut self) {}

    /// Detach the receive and transmit-done callbacks.
    fn disable_callbacks(&mut self) {}

    /// Standby.
    fn idle(&mut self);

    /// Continuous receive.
    fn receive(&mut self);

    fn enable_invert_iq(&mut self);

    fn disable_invert_iq(&mut self);

    fn begin_packet(&mut self);

    /// Append bytes to the packet being built. Returns the count accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    fn flush(&mut self) {}

    fn end_packet(&mut self);

    /// Next byte of the packet being received.
    fn read(&mut self) -> Option<u8>;

    /// Receive mode: normal IQ, then listen.
    ///
    /// Nodes transmit with normal IQ and the gateway with inverted IQ, so a
    /// gateway never hears another gateway.
    fn rx_mode(&mut self) {
        self.disable_invert_iq();
        self.receive();
    }

    /// Transmit mode: standby, then inverted IQ.
    fn tx_mode(&mut self) {
        self.idle();
        self.enable_invert_iq();
    }
}

/// Type-erased radio, as held by a running [`Dongle`](crate::Dongle).
pub type DynRadio = Box<dyn Radio>;

impl<T: Radio + ?Sized> Radio for Box<T> {
    fn begin(&mut self, frequency_hz: u64) -> bool {
        (**self).begin(frequency_hz)
    }

    fn set_spreading_factor(&mut self, sf: u8) {
        (**self).set_spreading_factor(sf)
    }

    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) {
        (**self).set_signal_bandwidth(bandwidth_hz)
    }

    fn set_coding_rate4(&mut self, denominator: u8) {
        (**self).set_coding_rate4(denominator)
    }

    fn enable_crc(&mut self) {
        (**self).enable_crc()
    }

    fn enable_callbacks(&mut self) {
        (**self).enable_callbacks()
    }

    fn disable_callbacks(&mut self) {
        (**self).disable_callbacks()
    }

    fn idle(&mut self) {
        (**self).idle()
    }

    fn receive(&mut self) {
        (**self).receive()
    }

    fn enable_invert_iq(&mut self) {
        (**self).enable_invert_iq()
    }

    fn disable_invert_iq(&mut self) {
        (**self).disable_invert_iq()
    }

    fn begin_packet(&mut self) {
        (**self).begin_packet()
    }

    fn write(&mut self, data: &[u8]) -> usize {
        (**self).write(data)
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn end_packet(&mut self) {
        (**self).end_packet()
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }

    fn rx_mode(&mut self) {
        (**self).rx_mode()
    }

    fn tx_mode(&mut self) {
        (**self).tx_mode()
    }
}

/// Modem mode as seen by [`MemoryRadio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioMode {
    #[default]
    Sleep,
    Standby,
    Receive,
}

/// Observable state of a [`MemoryRadio`].
#[derive(Debug, Default)]
pub struct MemoryRadioState {
    pub frequency_hz: u64,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate: u8,
    pub crc_enabled: bool,
    pub callbacks_enabled: bool,
    pub invert_iq: bool,
    pub mode: RadioMode,
    /// `begin` calls so far.
    pub begin_calls: u32,
    /// `begin` calls that will fail before one succeeds.
    pub begin_failures: u32,
    /// Completed transmissions, in order.
    pub sent: Vec<Vec<u8>>,
    /// Whether each transmission went out with inverted IQ.
    pub sent_inverted: Vec<bool>,
    packet: Option<Vec<u8>>,
    rx: VecDeque<u8>,
}

/// In-memory [`Radio`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRadio {
    state: Arc<Mutex<MemoryRadioState>>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio whose first `failures` `begin` calls fail.
    pub fn failing_begin(failures: u32) -> Self {
        let radio = Self::new();
        radio.state().begin_failures = failures;
        radio
    }

    /// Lock and inspect the shared state.
    pub fn state(&self) -> MutexGuard<'_, MemoryRadioState> {
        // A poisoned lock only means a test panicked mid-call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue raw bytes to be returned by `read`.
    pub fn inject(&self, frame: &[u8]) {
        self.state().rx.extend(frame.iter().copied());
    }

    /// Frames transmitted so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    /// Bytes injected but not yet read.
    pub fn pending_rx(&self) -> usize {
        self.state().rx.len()
    }
}

impl Radio for MemoryRadio {
    fn begin(&mut self, frequency_hz: u64) -> bool {
        let mut state = self.state();
        state.begin_calls += 1;
        if state.begin_failures > 0 {
            state.begin_failures -= 1;
            return false;
        }
        state.frequency_hz = frequency_hz;
        state.mode = RadioMode::Standby;
        true
    }

    fn set_spreading_factor(&mut self, sf: u8) {
        self.state().spreading_factor = sf;
    }

    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) {
        self.state().bandwidth_hz = bandwidth_hz;
    }

    fn set_coding_rate4(&mut self, denominator: u8) {
        self.state().coding_rate = denominator;
    }

    fn enable_crc(&mut self) {
        self.state().crc_enabled = true;
    }

    fn enable_callbacks(&mut self) {
        self.state().callbacks_enabled = true;
    }

    fn disable_callbacks(&mut self) {
        self.state().callbacks_enabled = false;
    }

    fn idle(&mut self) {
        self.state().mode = RadioMode::Standby;
    }

    fn receive(&mut self) {
        self.state().mode = RadioMode::Receive;
    }

    fn enable_invert_iq(&mut self) {
        self.state().invert_iq = true;
    }

    fn disable_invert_iq(&mut self) {
        self.state().invert_iq = false;
    }

    fn begin_packet(&mut self) {
        self.state().packet = Some(Vec::new());
    }

    fn write(&mut self, data: &[u8]) -> usize {
        match self.state().packet.as_mut() {
            Some(packet) => {
                packet.extend_from_slice(data);
                data.len()
            }
            None => 0,
        }
    }

    fn end_packet(&mut self) {
        let mut state = self.state();
        if let Some(packet) = state.packet.take() {
            let inverted = state.invert_iq;
            state.sent.push(packet);
            state.sent_inverted.push(inverted);
        }
    }

    fn read(&mut self) -> Option<u8> {
        self.state().rx.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_helpers() {
        let mut radio = MemoryRadio::new();
        radio.tx_mode();
        assert_eq!(radio.state().mode, RadioMode::Standby);
        assert!(radio.state().invert_iq);

        radio.rx_mode();
        assert_eq!(radio.state().mode, RadioMode::Receive);
        assert!(!radio.state().invert_iq);
    }

    #[test]
    fn test_packet_recording() {
        let mut radio = MemoryRadio::new();
        assert_eq!(radio.write(&[1]), 0);

        radio.tx_mode();
        radio.begin_packet();
        radio.write(&[1, 2]);
        radio.write(&[3]);
        radio.end_packet();

        assert_eq!(radio.sent(), vec![vec![1, 2, 3]]);
        assert_eq!(radio.state().sent_inverted, vec![true]);
    }

    #[test]
    fn test_inject_and_read() {
        let radio = MemoryRadio::new();
        let mut driver = radio.clone();
        radio.inject(&[7, 8]);
        assert_eq!(radio.pending_rx(), 2);
        assert_eq!(driver.read(), Some(7));
        assert_eq!(driver.read(), Some(8));
        assert_eq!(driver.read(), None);
    }

    #[test]
    fn test_failing_begin() {
        let mut radio = MemoryRadio::failing_begin(2);
        assert!(!radio.begin(868_500_000));
        assert!(!radio.begin(868_500_000));
        assert!(radio.begin(868_500_000));
        assert_eq!(radio.state().begin_calls, 3);
        assert_eq!(radio.state().frequency_hz, 868_500_000);
    }
}
