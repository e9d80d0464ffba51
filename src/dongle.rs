//! Dongle builder and runtime tasks.
//!
//! The [`DongleBuilder`] provides a fluent API for configuring the dongle.
//! [`DongleBuilder::start`] brings the radio up and spawns:
//! 1. Serial receive task (byte-stuffing decoder into the multiplexer)
//! 2. Serial writer task
//! 3. Radio to serial forwarding
//! 4. Serial to radio forwarding (one reliable send at a time)
//! 5. Outbound drain (one radio transmission per queued frame)
//! 6. System packet task
//! 7. Heartbeat task
//!
//! The radio driver glue calls [`GatewayLink::on_receive`] through
//! [`Dongle::link`] from its receive callback.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lorahome_dongle::{Dongle, DongleConfig, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> lorahome_dongle::Result<()> {
//!     let config = DongleConfig::load("dongle.toml")?;
//!     let store = Arc::new(MemoryStore::with_settings(config.radio, config.network_id));
//!     let dongle = Dongle::builder()
//!         .config(config)
//!         .on_reset(|| std::process::exit(0))
//!         .start(radio, store, serial_rx, serial_tx)
//!         .await?;
//!
//!     dongle.wait_for_shutdown().await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::config::DongleConfig;
use crate::error::{DongleError, Result};
use crate::gateway::GatewayLink;
use crate::handler::{SystemAction, SystemHandler};
use crate::protocol::Packet;
use crate::serial::SerialApi;
use crate::storage::ConfigStore;
use crate::transport::{spawn_reader_task, ActivityIndicator, DynRadio, Radio};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Sleep between polls of an empty queue.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long shutdown waits for the serial writer to flush before aborting it.
pub const WRITER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Called when the host requests a reset.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Builder for configuring and starting a dongle.
pub struct DongleBuilder {
    config: DongleConfig,
    writer_config: WriterConfig,
    reset_hook: Option<ResetHook>,
    activity: Option<ActivityIndicator>,
}

impl DongleBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: DongleConfig::default(),
            writer_config: WriterConfig::default(),
            reset_hook: None,
            activity: None,
        }
    }

    /// Use the given configuration.
    ///
    /// Radio settings and network id are read from the [`ConfigStore`]
    /// passed to [`start`](Self::start); the rest comes from here.
    pub fn config(mut self, config: DongleConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` when the host sends a reset request.
    pub fn on_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reset_hook = Some(Arc::new(hook));
        self
    }

    /// Drive a serial activity indicator (on while a frame is being received).
    pub fn serial_activity<F>(mut self, indicator: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.activity = Some(Arc::new(indicator));
        self
    }

    /// Set the serial writer channel capacity.
    ///
    /// Default: 8
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Validate the configuration, set up the radio and spawn all tasks.
    pub async fn start<R, Rd, Wr>(
        self,
        radio: R,
        store: Arc<dyn ConfigStore>,
        serial_reader: Rd,
        serial_writer: Wr,
    ) -> Result<Dongle>
    where
        R: Radio,
        Rd: AsyncRead + Unpin + Send + 'static,
        Wr: AsyncWrite + Unpin + Send + 'static,
    {
        Dongle::start(self, radio, store, serial_reader, serial_writer).await
    }
}

impl Default for DongleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running dongle.
pub struct Dongle {
    link: Arc<GatewayLink<DynRadio>>,
    serial: Arc<SerialApi>,
    tasks: Vec<JoinHandle<()>>,
    /// Ends when the serial stream closes.
    reader_task: JoinHandle<Result<()>>,
    writer_task: JoinHandle<Result<()>>,
}

impl Dongle {
    /// Create a new dongle builder.
    pub fn builder() -> DongleBuilder {
        DongleBuilder::new()
    }

    async fn start<R, Rd, Wr>(
        builder: DongleBuilder,
        radio: R,
        store: Arc<dyn ConfigStore>,
        serial_reader: Rd,
        serial_writer: Wr,
    ) -> Result<Self>
    where
        R: Radio,
        Rd: AsyncRead + Unpin + Send + 'static,
        Wr: AsyncWrite + Unpin + Send + 'static,
    {
        let DongleBuilder {
            config,
            writer_config,
            reset_hook,
            activity,
        } = builder;
        config.validate()?;
        if writer_config.channel_capacity == 0 {
            return Err(DongleError::Config(
                "serial writer channel capacity must be greater than 0".into(),
            ));
        }

        // 1. Radio up, with persisted settings
        let mut link_config = config.link_config();
        link_config.network_id = store.network_id();
        let radio: DynRadio = Box::new(radio);
        let link = Arc::new(GatewayLink::new(radio, link_config));
        link.setup(&store.radio_config()).await?;

        // 2. Serial writer and multiplexer
        let (writer, writer_task) = spawn_writer_task(serial_writer, writer_config);
        let serial = Arc::new(SerialApi::with_limits(
            writer,
            config.serial_queue_capacity,
            config.max_serial_frame_size,
        ));

        // 3. Serial receive
        let reader_task = spawn_reader_task(serial_reader, serial.clone(), activity);

        // 4. Forwarding, drain, system and heartbeat tasks
        let mut tasks = vec![tokio::spawn(radio_to_serial(link.clone(), serial.clone()))];
        tasks.push(tokio::spawn(serial_to_radio(link.clone(), serial.clone())));
        tasks.push(tokio::spawn(drain_outbound(link.clone())));
        let handler = SystemHandler::new(link.clone(), serial.clone(), store);
        tasks.push(tokio::spawn(system_loop(handler, serial.clone(), reset_hook)));
        tasks.push(tokio::spawn(heartbeat_loop(
            link.clone(),
            serial.clone(),
            config.heartbeat_period(),
        )));

        tracing::info!("Dongle started on network {:#06x}", link.network_id());

        Ok(Dongle {
            link,
            serial,
            tasks,
            reader_task,
            writer_task,
        })
    }

    /// The link engine, for the radio receive callback and diagnostics.
    pub fn link(&self) -> &Arc<GatewayLink<DynRadio>> {
        &self.link
    }

    /// The serial multiplexer.
    pub fn serial(&self) -> &Arc<SerialApi> {
        &self.serial
    }

    /// Stop all tasks and detach the radio.
    pub async fn shutdown(mut self) {
        self.reader_task.abort();
        let _ = (&mut self.reader_task).await;
        self.stop().await;
    }

    /// Wait until the serial stream closes, then shut down.
    ///
    /// Returns the serial read error, if the stream failed rather than
    /// closing.
    pub async fn wait_for_shutdown(mut self) -> Result<()> {
        let outcome = match (&mut self.reader_task).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Serial read task failed: {}", e);
                Ok(())
            }
        };
        if let Err(e) = &outcome {
            tracing::error!("Serial read error: {}", e);
        }
        self.stop().await;
        outcome
    }

    async fn stop(mut self) {
        self.link.disable();
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        // Dropping our writer handle lets the writer flush and exit, unless a
        // caller still holds a clone of the multiplexer
        drop(self.serial);
        match tokio::time::timeout(WRITER_STOP_TIMEOUT, &mut self.writer_task).await {
            Ok(Ok(Err(e))) => tracing::debug!("Serial writer ended with error: {}", e),
            Ok(Err(e)) => tracing::debug!("Serial writer task failed: {}", e),
            Ok(Ok(Ok(()))) => {}
            Err(_) => {
                tracing::debug!("Serial writer still referenced, aborting it");
                self.writer_task.abort();
                let _ = (&mut self.writer_task).await;
            }
        }
        tracing::info!("Dongle stopped");
    }
}

async fn radio_to_serial<R: Radio>(link: Arc<GatewayLink<R>>, serial: Arc<SerialApi>) {
    loop {
        let Some(packet) = link.pop_packet() else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };
        if let Err(e) = serial.send_wireless_packet(&packet.to_unsigned()) {
            tracing::warn!(
                "Dropping packet from node {:#04x}: {}",
                packet.header.emitter,
                e
            );
        }
    }
}

async fn serial_to_radio<R: Radio>(link: Arc<GatewayLink<R>>, serial: Arc<SerialApi>) {
    loop {
        let Some(frame) = serial.pop_wireless_packet() else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };
        let packet = match Packet::from_unsigned(&frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Rejecting wireless packet {}: {}", frame.header.packet_id, e);
                continue;
            }
        };
        match link.put_packet(packet).await {
            Ok(attempts) => tracing::debug!(
                "Wireless packet {} delivered in {} attempt(s)",
                frame.header.packet_id,
                attempts
            ),
            Err(e) => tracing::warn!("Wireless packet {}: {}", frame.header.packet_id, e),
        }
    }
}

async fn drain_outbound<R: Radio>(link: Arc<GatewayLink<R>>) {
    loop {
        link.transmit_ready().await;
        while link.send() {}
    }
}

async fn system_loop<R: Radio>(
    handler: SystemHandler<R>,
    serial: Arc<SerialApi>,
    reset_hook: Option<ResetHook>,
) {
    loop {
        let Some(packet) = serial.pop_system_packet() else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };
        match handler.handle(&packet).await {
            Ok(SystemAction::Reset) => match &reset_hook {
                Some(hook) => hook(),
                None => tracing::warn!("Reset requested but no reset hook is installed"),
            },
            Ok(_) => {}
            Err(e) => tracing::error!("System packet {:#04x} failed: {}", packet.sys_type, e),
        }
    }
}

async fn heartbeat_loop<R: Radio>(
    link: Arc<GatewayLink<R>>,
    serial: Arc<SerialApi>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let heartbeat = link.stats().heartbeat();
        if let Err(e) = serial.send_system_packet(&heartbeat.to_packet()) {
            tracing::debug!("Heartbeat not sent: {}", e);
        }
    }
}
