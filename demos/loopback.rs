//! Loopback demo - a dongle with a simulated node and host.
//!
//! This example demonstrates:
//! - Loading a `DongleConfig` (optional TOML path as first argument)
//! - Starting a dongle over an in-memory serial line and radio
//! - A node reporting readings and acking gateway messages
//! - A host asking for info and switching the node on
//!
//! ```text
//! RUST_LOG=lorahome_dongle=debug cargo run --example loopback
//! ```

use std::sync::Arc;
use std::time::Duration;

use lorahome_dongle::protocol::{serialize_ack, MessageType, Packet, PacketHeader, NODE_ID_GATEWAY};
use lorahome_dongle::serial::{
    encode, PayloadType, SerialDecoder, SerialPacket, SystemPacket, SystemPacketType,
};
use lorahome_dongle::{Dongle, DongleConfig, MemoryRadio, MemoryStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const NODE: u8 = 0x05;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DongleConfig::load(&path)?,
        None => DongleConfig {
            heartbeat_period_ms: 1000,
            ..DongleConfig::default()
        },
    };
    let network_id = config.network_id;
    let store = Arc::new(MemoryStore::with_settings(config.radio, config.network_id));

    // Serial line between the dongle and the simulated host
    let (device, host) = tokio::io::duplex(4096);
    let (serial_rx, serial_tx) = tokio::io::split(device);
    let radio = MemoryRadio::new();

    let dongle = Dongle::builder()
        .config(config)
        .on_reset(|| tracing::info!("Host asked for a reset"))
        .start(radio.clone(), store, serial_rx, serial_tx)
        .await?;

    // Simulated node: report a reading, ack whatever the gateway sends
    let link = dongle.link().clone();
    let node = tokio::spawn(async move {
        let mut counter = 0u16;
        let mut acked = 0;
        loop {
            counter = counter.wrapping_add(1);
            let reading = format!("{{\"temp\":{}}}", 20 + counter % 5);
            let frame = Packet::with_payload(
                NODE,
                NODE_ID_GATEWAY,
                MessageType::NodeMessageAck,
                network_id,
                counter,
                reading.as_bytes(),
            )
            .map(|p| p.serialize());
            if let Ok(frame) = frame {
                radio.inject(&frame);
                link.on_receive(frame.len());
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
            let sent = radio.sent();
            for frame in &sent[acked..] {
                let Ok(packet) = Packet::parse(frame) else {
                    continue;
                };
                if packet.kind() == Some(MessageType::GatewayMessageAck) {
                    let header = PacketHeader::new(
                        NODE,
                        NODE_ID_GATEWAY,
                        MessageType::NodeAck,
                        network_id,
                        packet.header.counter,
                        0,
                    );
                    let ack = serialize_ack(&header);
                    radio.inject(&ack);
                    link.on_receive(ack.len());
                }
            }
            acked = sent.len();
            tokio::time::sleep(Duration::from_millis(800)).await;
        }
    });

    // Simulated host
    let (mut host_rx, mut host_tx) = tokio::io::split(host);
    let printer = tokio::spawn(async move {
        let mut decoder = SerialDecoder::new();
        let mut buf = [0u8; 512];
        while let Ok(n) = host_rx.read(&mut buf).await {
            if n == 0 {
                break;
            }
            for body in decoder.push(&buf[..n]) {
                let Ok(packet) = SerialPacket::parse(&body) else {
                    continue;
                };
                match packet.kind() {
                    Some(PayloadType::Wireless) => {
                        if let Ok(p) = Packet::from_unsigned(&packet.payload) {
                            println!(
                                "node {:#04x}: {}",
                                p.header.emitter,
                                String::from_utf8_lossy(p.payload())
                            );
                        }
                    }
                    Some(PayloadType::System) => {
                        if let Ok(system) = SystemPacket::parse(&packet.payload) {
                            println!("system {:?}: {:02x?}", system.kind(), &system.body[..]);
                        }
                    }
                    Some(PayloadType::Log) => {
                        println!("log: {}", String::from_utf8_lossy(&packet.payload));
                    }
                    _ => {}
                }
            }
        }
    });

    let info = SystemPacket::new(SystemPacketType::Info, &[])?;
    let request = SerialPacket::new(1, PayloadType::System, &info.to_bytes())?;
    host_tx.write_all(&encode(&request.to_bytes(), 1024)?).await?;

    let command = Packet::with_payload(
        NODE_ID_GATEWAY,
        NODE,
        MessageType::GatewayMessageAck,
        network_id,
        1,
        br#"{"state":"ON"}"#,
    )?;
    let request = SerialPacket::new(2, PayloadType::Wireless, &command.to_unsigned())?;
    host_tx.write_all(&encode(&request.to_bytes(), 1024)?).await?;

    tokio::time::sleep(Duration::from_secs(4)).await;

    let stats = dongle.link().stats();
    println!(
        "rx={} tx={} err={} overflow={}",
        stats.rx_count(),
        stats.tx_count(),
        stats.error_count(),
        stats.overflow_count()
    );

    node.abort();
    dongle.shutdown().await;
    drop(host_tx);
    let _ = printer.await;
    Ok(())
}
