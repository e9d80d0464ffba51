//! System packet processing.
//!
//! Host requests arrive as [`SystemPacket`]s popped from the multiplexer.
//! Replies go straight back through the same multiplexer; settings changes
//! are persisted through the [`ConfigStore`] and applied to the link.

use std::sync::Arc;

use crate::config::{FIRMWARE_NAME, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};
use crate::config::RadioConfig;
use crate::error::Result;
use crate::gateway::GatewayLink;
use crate::serial::{AllSettings, SerialApi, SystemPacket, SystemPacketType};
use crate::storage::ConfigStore;
use crate::transport::Radio;

/// What the dongle should do after a system packet was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    /// A reply was sent to the host.
    Replied,
    /// Nothing to do (host-bound type, malformed or unknown packet).
    Ignored,
    /// The host asked for a restart.
    Reset,
}

/// Handles system packets from the host.
pub struct SystemHandler<R: Radio> {
    link: Arc<GatewayLink<R>>,
    api: Arc<SerialApi>,
    store: Arc<dyn ConfigStore>,
}

impl<R: Radio> SystemHandler<R> {
    pub fn new(link: Arc<GatewayLink<R>>, api: Arc<SerialApi>, store: Arc<dyn ConfigStore>) -> Self {
        Self { link, api, store }
    }

    /// Handle one system packet.
    ///
    /// Malformed and unknown packets are logged and ignored; errors are
    /// reserved for failures to reply or to reconfigure the radio.
    pub async fn handle(&self, packet: &SystemPacket) -> Result<SystemAction> {
        let Some(kind) = packet.kind() else {
            tracing::warn!("Unknown system packet type {}", packet.sys_type);
            return Ok(SystemAction::Ignored);
        };
        tracing::debug!("System packet {:?} ({} bytes)", kind, packet.body.len());

        match kind {
            SystemPacketType::Echo => {
                let reply = SystemPacket::new(SystemPacketType::Echo, &packet.body)?;
                self.api.send_system_packet(&reply)?;
                Ok(SystemAction::Replied)
            }
            SystemPacketType::Info => {
                let text = info_text();
                let reply = SystemPacket::new(SystemPacketType::Info, text.as_bytes())?;
                self.api.send_system_packet(&reply)?;
                Ok(SystemAction::Replied)
            }
            SystemPacketType::SetRadioSettings => {
                let radio = match RadioConfig::decode(&packet.body) {
                    Ok(radio) => radio,
                    Err(e) => {
                        tracing::warn!("Rejecting radio settings: {}", e);
                        return Ok(SystemAction::Ignored);
                    }
                };
                self.link.reconfigure(&radio).await?;
                self.store.set_radio_config(radio)?;
                self.send_all_settings()?;
                Ok(SystemAction::Replied)
            }
            SystemPacketType::GetAllSettings => {
                self.send_all_settings()?;
                Ok(SystemAction::Replied)
            }
            SystemPacketType::SetNetworkId => {
                let Some(id) = packet.body.get(..2) else {
                    tracing::warn!("Network id packet too short ({} bytes)", packet.body.len());
                    return Ok(SystemAction::Ignored);
                };
                let network_id = u16::from_le_bytes([id[0], id[1]]);
                self.store.set_network_id(network_id)?;
                self.link.set_network_id(network_id);
                self.send_all_settings()?;
                Ok(SystemAction::Replied)
            }
            SystemPacketType::Reset => {
                tracing::info!("Reset requested by host");
                Ok(SystemAction::Reset)
            }
            SystemPacketType::Heartbeat | SystemPacketType::AllSettingsInfo => {
                tracing::debug!("Ignoring dongle-bound {:?} from host", kind);
                Ok(SystemAction::Ignored)
            }
        }
    }

    /// Current settings as reported to the host.
    pub fn all_settings(&self) -> AllSettings {
        AllSettings {
            version: (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH),
            radio: self.store.radio_config(),
            network_id: self.link.network_id(),
        }
    }

    fn send_all_settings(&self) -> Result<()> {
        self.api.send_system_packet(&self.all_settings().to_packet())
    }
}

/// Firmware name and version, as sent in info replies.
pub fn info_text() -> String {
    format!(
        "{} v{}.{}.{}",
        FIRMWARE_NAME, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH
    )
}
