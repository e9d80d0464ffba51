//! Persisted configuration collaborator.
//!
//! The dongle reads its radio settings and network id at startup and writes
//! them back when the host changes them. [`MemoryStore`] keeps them in
//! memory; firmware builds implement [`ConfigStore`] over their flash
//! key/value area.

use std::sync::Mutex;

use crate::config::RadioConfig;
use crate::error::Result;

/// Storage for the settings the host may change at runtime.
pub trait ConfigStore: Send + Sync + 'static {
    /// Stored radio settings, or the defaults when nothing valid is stored.
    fn radio_config(&self) -> RadioConfig;

    /// Stored network id, or the store's default.
    fn network_id(&self) -> u16;

    fn set_radio_config(&self, config: RadioConfig) -> Result<()>;

    fn set_network_id(&self, network_id: u16) -> Result<()>;
}

#[derive(Debug, Default)]
struct Stored {
    radio: Option<RadioConfig>,
    network_id: Option<u16>,
}

/// In-memory [`ConfigStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<Stored>,
    default_network_id: u16,
}

impl MemoryStore {
    /// An empty store falling back to `default_network_id`.
    pub fn new(default_network_id: u16) -> Self {
        Self {
            stored: Mutex::new(Stored::default()),
            default_network_id,
        }
    }

    /// A store pre-loaded with settings.
    pub fn with_settings(radio: RadioConfig, network_id: u16) -> Self {
        Self {
            stored: Mutex::new(Stored {
                radio: Some(radio),
                network_id: Some(network_id),
            }),
            default_network_id: network_id,
        }
    }

    fn stored(&self) -> std::sync::MutexGuard<'_, Stored> {
        self.stored.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConfigStore for MemoryStore {
    fn radio_config(&self) -> RadioConfig {
        self.stored().radio.unwrap_or_default()
    }

    fn network_id(&self) -> u16 {
        self.stored().network_id.unwrap_or(self.default_network_id)
    }

    fn set_radio_config(&self, config: RadioConfig) -> Result<()> {
        self.stored().radio = Some(config);
        Ok(())
    }

    fn set_network_id(&self, network_id: u16) -> Result<()> {
        self.stored().network_id = Some(network_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;

    #[test]
    fn test_defaults_when_empty() {
        let store = MemoryStore::new(0x0042);
        assert_eq!(store.radio_config(), RadioConfig::default());
        assert_eq!(store.network_id(), 0x0042);
    }

    #[test]
    fn test_set_and_get() {
        let store = MemoryStore::new(0);
        let radio = RadioConfig {
            channel: Channel::Ch6,
            ..RadioConfig::default()
        };
        store.set_radio_config(radio).unwrap();
        store.set_network_id(0xCAFE).unwrap();
        assert_eq!(store.radio_config(), radio);
        assert_eq!(store.network_id(), 0xCAFE);
    }

    #[test]
    fn test_with_settings() {
        let radio = RadioConfig {
            channel: Channel::Ch1,
            ..RadioConfig::default()
        };
        let store = MemoryStore::with_settings(radio, 7);
        assert_eq!(store.radio_config().channel, Channel::Ch1);
        assert_eq!(store.network_id(), 7);
    }
}
