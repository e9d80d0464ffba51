//! # lorahome-dongle
//!
//! Core of the LoRaHome USB dongle: a radio-to-serial gateway between
//! battery-powered LoRa nodes and a host computer.
//!
//! ## Architecture
//!
//! - **Radio side**: 8-byte header + payload + CRC16-CCITT frames, with
//!   acknowledgement, retry and IQ inversion handled by [`GatewayLink`]
//! - **Serial side**: byte-stuffed frames (START/STOP/ESC) carrying
//!   log, system and wireless packets, multiplexed by [`SerialApi`]
//!
//! Both sides are connected by bounded queues that drop on overflow; the
//! [`Dongle`] composition root spawns the tasks that move packets between
//! them.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lorahome_dongle::{Dongle, MemoryRadio, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> lorahome_dongle::Result<()> {
//!     let (serial_rx, serial_tx) = tokio::io::split(open_serial_port()?);
//!     let dongle = Dongle::builder()
//!         .start(MemoryRadio::new(), Arc::new(MemoryStore::new(0x0101)), serial_rx, serial_tx)
//!         .await?;
//!
//!     dongle.wait_for_shutdown().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod serial;
pub mod storage;
pub mod transport;
pub mod writer;

mod dongle;

pub use config::{DongleConfig, LinkConfig, RadioConfig};
pub use dongle::{Dongle, DongleBuilder, ResetHook, POLL_INTERVAL, WRITER_STOP_TIMEOUT};
pub use error::{DongleError, Result};
pub use gateway::{GatewayLink, LinkStats, Received};
pub use serial::SerialApi;
pub use storage::{ConfigStore, MemoryStore};
pub use transport::{MemoryRadio, Radio};
