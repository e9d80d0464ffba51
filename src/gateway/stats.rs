//! Link counters.
//!
//! Written only by the link engine; read by the heartbeat and any status
//! display. Plain relaxed atomics: readers tolerate slightly stale values.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::serial::Heartbeat;

/// Counters kept by the gateway link.
#[derive(Debug)]
pub struct LinkStats {
    /// Physical frames seen by receive classification.
    rx: AtomicU32,
    /// Frames handed to the radio.
    tx: AtomicU32,
    /// CRC failures and unknown message types.
    err: AtomicU32,
    /// Frames dropped on a full link queue.
    overflow: Arc<AtomicU64>,
    /// Milliseconds since `epoch` when a data packet was last popped.
    last_packet_ms: AtomicU64,
    epoch: Instant,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            rx: AtomicU32::new(0),
            tx: AtomicU32::new(0),
            err: AtomicU32::new(0),
            overflow: Arc::new(AtomicU64::new(0)),
            last_packet_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn record_rx(&self) {
        self.rx.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_tx(&self) {
        self.tx.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error(&self) {
        self.err.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_packet_ms.store(ms, Ordering::Relaxed);
    }

    /// Shared overflow counter, handed to the link queues.
    pub(crate) fn overflow_counter(&self) -> Arc<AtomicU64> {
        self.overflow.clone()
    }

    #[inline]
    pub fn rx_count(&self) -> u32 {
        self.rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tx_count(&self) -> u32 {
        self.tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn error_count(&self) -> u32 {
        self.err.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Time of the last popped data packet, in ms since the link started.
    pub fn last_packet_ms(&self) -> u64 {
        self.last_packet_ms.load(Ordering::Relaxed)
    }

    /// Snapshot for the heartbeat packet.
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            rx_counter: self.rx_count(),
            tx_counter: self.tx_count(),
            err_counter: self.error_count(),
        }
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}
