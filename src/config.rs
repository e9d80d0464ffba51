//! Dongle configuration.
//!
//! Radio settings are typed enums with a one-byte wire code (used by the
//! system packet sub-protocol) and a driver value (Hz, SF, CR denominator).
//! The full [`DongleConfig`] loads from TOML, with the network id
//! overridable through `LORAHOME_NETWORK_ID`.
//!
//! ```toml
//! network_id = 0x1234
//! ack_timeout_ms = 300
//!
//! [radio]
//! channel = 3
//! bandwidth = 125000
//! spreading_factor = 7
//! coding_rate = 5
//! ```

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DongleError, Result};

/// Firmware name reported in info packets.
pub const FIRMWARE_NAME: &str = "LoRaHome Dongle";

/// Firmware version triplet.
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 8;
pub const VERSION_PATCH: u8 = 4;

/// Environment variable overriding the configured network id.
pub const NETWORK_ID_ENV: &str = "LORAHOME_NETWORK_ID";

/// Default ack wait per attempt.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(300);

/// Default number of send attempts for a reliable send.
pub const DEFAULT_MAX_RETRY: u8 = 3;

/// Default capacity of each gateway link queue.
pub const DEFAULT_LINK_QUEUE_CAPACITY: usize = 5;

/// Default capacity of the serial frame queues.
pub const DEFAULT_SERIAL_QUEUE_CAPACITY: usize = 8;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_millis(5000);

/// Default number of `begin` attempts before giving up on the radio.
pub const DEFAULT_RADIO_BEGIN_ATTEMPTS: u32 = 10;

/// Default largest byte-stuffed frame the serial transport will send.
///
/// Large enough for a full 132-byte serial frame with every byte escaped.
pub const DEFAULT_MAX_SERIAL_FRAME_SIZE: usize = 2 * (4 + 128) + 2;

/// LoRa frequency channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Channel {
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
    Ch4 = 4,
    Ch5 = 5,
    Ch6 = 6,
    Ch7 = 7,
    Ch8 = 8,
}

impl Channel {
    /// Carrier frequency in Hz.
    pub fn frequency_hz(self) -> u64 {
        match self {
            Self::Ch1 => 868_100_000,
            Self::Ch2 => 868_300_000,
            Self::Ch3 => 868_500_000,
            Self::Ch4 => 867_100_000,
            Self::Ch5 => 867_300_000,
            Self::Ch6 => 867_500_000,
            Self::Ch7 => 867_700_000,
            Self::Ch8 => 867_900_000,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Ch1),
            2 => Ok(Self::Ch2),
            3 => Ok(Self::Ch3),
            4 => Ok(Self::Ch4),
            5 => Ok(Self::Ch5),
            6 => Ok(Self::Ch6),
            7 => Ok(Self::Ch7),
            8 => Ok(Self::Ch8),
            _ => Err(format!("invalid channel code {}", code)),
        }
    }
}

impl From<Channel> for u8 {
    fn from(ch: Channel) -> u8 {
        ch as u8
    }
}

/// LoRa signal bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Bandwidth {
    Bw7_8kHz,
    Bw10_4kHz,
    Bw15_6kHz,
    Bw20_8kHz,
    Bw31_25kHz,
    Bw41_7kHz,
    Bw62_5kHz,
    Bw125kHz,
    Bw250kHz,
    Bw500kHz,
}

impl Bandwidth {
    const TABLE: [(Bandwidth, u8, u32); 10] = [
        (Self::Bw7_8kHz, 1, 7_800),
        (Self::Bw10_4kHz, 2, 10_400),
        (Self::Bw15_6kHz, 3, 15_600),
        (Self::Bw20_8kHz, 4, 20_800),
        (Self::Bw31_25kHz, 5, 31_250),
        (Self::Bw41_7kHz, 6, 41_700),
        (Self::Bw62_5kHz, 7, 62_500),
        (Self::Bw125kHz, 8, 125_000),
        (Self::Bw250kHz, 9, 250_000),
        (Self::Bw500kHz, 10, 500_000),
    ];

    /// Bandwidth in Hz.
    pub fn hz(self) -> u32 {
        Self::TABLE
            .iter()
            .find(|(bw, _, _)| *bw == self)
            .map(|(_, _, hz)| *hz)
            .unwrap_or(125_000)
    }

    /// One-byte wire code.
    pub fn code(self) -> u8 {
        Self::TABLE
            .iter()
            .find(|(bw, _, _)| *bw == self)
            .map(|(_, code, _)| *code)
            .unwrap_or(8)
    }

    /// Parse a one-byte wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::TABLE.iter().find(|(_, c, _)| *c == code).map(|(bw, _, _)| *bw)
    }

    /// Parse a bandwidth in Hz.
    pub fn from_hz(hz: u32) -> Option<Self> {
        Self::TABLE.iter().find(|(_, _, h)| *h == hz).map(|(bw, _, _)| *bw)
    }
}

impl TryFrom<u32> for Bandwidth {
    type Error = String;

    fn try_from(hz: u32) -> std::result::Result<Self, Self::Error> {
        Self::from_hz(hz).ok_or_else(|| format!("unsupported bandwidth {} Hz", hz))
    }
}

impl From<Bandwidth> for u32 {
    fn from(bw: Bandwidth) -> u32 {
        bw.hz()
    }
}

/// LoRa spreading factor (7-12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub const SF7: Self = Self(7);
    pub const SF12: Self = Self(12);

    /// Raw factor, also the wire code.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = String;

    fn try_from(sf: u8) -> std::result::Result<Self, Self::Error> {
        if (7..=12).contains(&sf) {
            Ok(Self(sf))
        } else {
            Err(format!("spreading factor {} outside 7-12", sf))
        }
    }
}

impl From<SpreadingFactor> for u8 {
    fn from(sf: SpreadingFactor) -> u8 {
        sf.0
    }
}

/// LoRa coding rate 4/x, stored as the denominator (5-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CodingRate(u8);

impl CodingRate {
    pub const CR4_5: Self = Self(5);
    pub const CR4_8: Self = Self(8);

    /// Denominator, also the wire code.
    pub fn denominator(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CodingRate {
    type Error = String;

    fn try_from(cr: u8) -> std::result::Result<Self, Self::Error> {
        if (5..=8).contains(&cr) {
            Ok(Self(cr))
        } else {
            Err(format!("coding rate denominator {} outside 5-8", cr))
        }
    }
}

impl From<CodingRate> for u8 {
    fn from(cr: CodingRate) -> u8 {
        cr.0
    }
}

/// Radio modem configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub channel: Channel,
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub coding_rate: CodingRate,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Ch3,
            bandwidth: Bandwidth::Bw125kHz,
            spreading_factor: SpreadingFactor::SF7,
            coding_rate: CodingRate::CR4_5,
        }
    }
}

impl RadioConfig {
    /// Wire size of the encoded configuration.
    pub const ENCODED_SIZE: usize = 4;

    /// Encode as channel, bandwidth, SF, CR codes.
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        [
            self.channel.into(),
            self.bandwidth.code(),
            self.spreading_factor.value(),
            self.coding_rate.denominator(),
        ]
    }

    /// Decode from channel, bandwidth, SF, CR codes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(DongleError::Protocol(format!(
                "Radio settings need {} bytes, got {}",
                Self::ENCODED_SIZE,
                buf.len()
            )));
        }
        let channel = Channel::try_from(buf[0]).map_err(DongleError::Protocol)?;
        let bandwidth = Bandwidth::from_code(buf[1])
            .ok_or_else(|| DongleError::Protocol(format!("invalid bandwidth code {}", buf[1])))?;
        let spreading_factor = SpreadingFactor::try_from(buf[2]).map_err(DongleError::Protocol)?;
        let coding_rate = CodingRate::try_from(buf[3]).map_err(DongleError::Protocol)?;
        Ok(Self {
            channel,
            bandwidth,
            spreading_factor,
            coding_rate,
        })
    }
}

/// Tunables of the gateway link engine.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Network id the gateway accepts and stamps on its frames.
    pub network_id: u16,
    /// Ack wait per attempt.
    pub ack_timeout: Duration,
    /// Total send attempts for a reliable send.
    pub max_retry: u8,
    /// Capacity of the inbound data, inbound ack and outbound queues.
    pub queue_capacity: usize,
    /// `begin` attempts during setup.
    pub radio_begin_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            network_id: 0,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retry: DEFAULT_MAX_RETRY,
            queue_capacity: DEFAULT_LINK_QUEUE_CAPACITY,
            radio_begin_attempts: DEFAULT_RADIO_BEGIN_ATTEMPTS,
        }
    }
}

/// Complete dongle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    pub network_id: u16,
    pub radio: RadioConfig,
    pub ack_timeout_ms: u64,
    pub max_retry: u8,
    pub link_queue_capacity: usize,
    pub serial_queue_capacity: usize,
    pub heartbeat_period_ms: u64,
    pub radio_begin_attempts: u32,
    pub max_serial_frame_size: usize,
}

impl Default for DongleConfig {
    fn default() -> Self {
        Self {
            network_id: 0,
            radio: RadioConfig::default(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            max_retry: DEFAULT_MAX_RETRY,
            link_queue_capacity: DEFAULT_LINK_QUEUE_CAPACITY,
            serial_queue_capacity: DEFAULT_SERIAL_QUEUE_CAPACITY,
            heartbeat_period_ms: DEFAULT_HEARTBEAT_PERIOD.as_millis() as u64,
            radio_begin_attempts: DEFAULT_RADIO_BEGIN_ATTEMPTS,
            max_serial_frame_size: DEFAULT_MAX_SERIAL_FRAME_SIZE,
        }
    }
}

impl DongleConfig {
    /// Load configuration from a TOML file.
    ///
    /// `LORAHOME_NETWORK_ID` (decimal or `0x` hex) overrides the file value.
    pub fn load(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DongleError::Config(format!("Failed to read {}: {}", path, e)))?;
        let mut config = Self::from_toml_str(&text)?;

        if let Ok(value) = std::env::var(NETWORK_ID_ENV) {
            config.network_id = parse_network_id(&value)?;
            tracing::info!("Using network id {:#06x} from {}", config.network_id, NETWORK_ID_ENV);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text (no environment override).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DongleConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(DongleError::Config("max_retry must be at least 1".into()));
        }
        if self.link_queue_capacity == 0 || self.serial_queue_capacity == 0 {
            return Err(DongleError::Config("queue capacities must be greater than 0".into()));
        }
        // START + 4-byte serial header + STOP
        if self.max_serial_frame_size < 6 {
            return Err(DongleError::Config(format!(
                "max_serial_frame_size {} cannot carry a serial header",
                self.max_serial_frame_size
            )));
        }
        if self.heartbeat_period_ms == 0 {
            return Err(DongleError::Config("heartbeat_period_ms must be greater than 0".into()));
        }
        Ok(())
    }

    /// Ack wait per attempt.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Heartbeat period.
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    /// Link engine tunables derived from this configuration.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            network_id: self.network_id,
            ack_timeout: self.ack_timeout(),
            max_retry: self.max_retry,
            queue_capacity: self.link_queue_capacity,
            radio_begin_attempts: self.radio_begin_attempts,
        }
    }
}

fn parse_network_id(value: &str) -> Result<u16> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|e| DongleError::Config(format!("Invalid network id {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_defaults() {
        let radio = RadioConfig::default();
        assert_eq!(radio.channel.frequency_hz(), 868_500_000);
        assert_eq!(radio.bandwidth.hz(), 125_000);
        assert_eq!(radio.spreading_factor.value(), 7);
        assert_eq!(radio.coding_rate.denominator(), 5);
    }

    #[test]
    fn test_radio_config_wire_codes() {
        let radio = RadioConfig {
            channel: Channel::Ch5,
            bandwidth: Bandwidth::Bw250kHz,
            spreading_factor: SpreadingFactor::SF12,
            coding_rate: CodingRate::CR4_8,
        };
        let bytes = radio.encode();
        assert_eq!(bytes, [5, 9, 12, 8]);
        assert_eq!(RadioConfig::decode(&bytes).unwrap(), radio);
    }

    #[test]
    fn test_radio_config_decode_rejects_bad_codes() {
        assert!(RadioConfig::decode(&[0, 8, 7, 5]).is_err());
        assert!(RadioConfig::decode(&[3, 11, 7, 5]).is_err());
        assert!(RadioConfig::decode(&[3, 8, 6, 5]).is_err());
        assert!(RadioConfig::decode(&[3, 8, 7, 9]).is_err());
        assert!(RadioConfig::decode(&[3, 8, 7]).is_err());
    }

    #[test]
    fn test_bandwidth_lookup() {
        for code in 1..=10 {
            let bw = Bandwidth::from_code(code).unwrap();
            assert_eq!(bw.code(), code);
            assert_eq!(Bandwidth::from_hz(bw.hz()), Some(bw));
        }
        assert!(Bandwidth::from_hz(100_000).is_none());
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = DongleConfig::from_toml_str(
            r#"
            network_id = 0x1234

            [radio]
            channel = 1
            bandwidth = 250000
            spreading_factor = 9
            coding_rate = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.network_id, 0x1234);
        assert_eq!(config.radio.channel, Channel::Ch1);
        assert_eq!(config.radio.bandwidth, Bandwidth::Bw250kHz);
        assert_eq!(config.ack_timeout(), DEFAULT_ACK_TIMEOUT);
        assert_eq!(config.max_retry, DEFAULT_MAX_RETRY);
        assert_eq!(config.link_queue_capacity, DEFAULT_LINK_QUEUE_CAPACITY);
    }

    #[test]
    fn test_from_toml_rejects_bad_radio() {
        let result = DongleConfig::from_toml_str(
            r#"
            [radio]
            channel = 3
            bandwidth = 100000
            spreading_factor = 7
            coding_rate = 5
            "#,
        );
        assert!(matches!(result, Err(DongleError::Config(_))));
    }

    #[test]
    fn test_config_validation() {
        let mut config = DongleConfig::default();
        assert!(config.validate().is_ok());

        config.max_retry = 0;
        assert!(config.validate().is_err());
        config.max_retry = 3;

        config.link_queue_capacity = 0;
        assert!(config.validate().is_err());
        config.link_queue_capacity = 5;

        config.max_serial_frame_size = 5;
        assert!(config.validate().is_err());
        config.max_serial_frame_size = DEFAULT_MAX_SERIAL_FRAME_SIZE;

        config.heartbeat_period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_link_config_from_dongle_config() {
        let config = DongleConfig {
            network_id: 42,
            ack_timeout_ms: 150,
            max_retry: 5,
            ..DongleConfig::default()
        };
        let link = config.link_config();
        assert_eq!(link.network_id, 42);
        assert_eq!(link.ack_timeout, Duration::from_millis(150));
        assert_eq!(link.max_retry, 5);
    }

    #[test]
    fn test_parse_network_id() {
        assert_eq!(parse_network_id("4660").unwrap(), 0x1234);
        assert_eq!(parse_network_id("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_network_id(" 0XBEEF ").unwrap(), 0xBEEF);
        assert!(parse_network_id("70000").is_err());
        assert!(parse_network_id("zz").is_err());
    }
}
