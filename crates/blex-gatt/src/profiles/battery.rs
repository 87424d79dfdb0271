//! Battery Service (SIG 0x180F)

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use blex_core::{
    sig_uuid, CharacteristicProperties, CharacteristicRef, GattCharacteristic, GattError,
    GattResult, GattService, PeerAddress,
};

use crate::central::{CentralCallback, CentralSession};
use crate::config::GattConfig;
use crate::peripheral::{PeripheralHandler, PeripheralSession};
use crate::profile::Profile;
use crate::transport::{GattServerTransport, GattTransport};

pub const BATTERY_SERVICE: Uuid = sig_uuid(0x180F);
pub const BATTERY_LEVEL_CHARACTERISTIC: Uuid = sig_uuid(0x2A19);

/// Instance id of the device's own battery.
pub const DEFAULT_INSTANCE: u16 = 0;
/// Instance id of the second (charging case) battery.
pub const BOX_INSTANCE: u16 = 1;

pub fn create_service(instance_id: u16) -> GattService {
    GattService::new(BATTERY_SERVICE, instance_id).with_characteristic(GattCharacteristic::new(
        BATTERY_LEVEL_CHARACTERISTIC,
        CharacteristicProperties::READ,
    ))
}

pub fn create_services() -> Vec<GattService> {
    vec![create_service(DEFAULT_INSTANCE), create_service(BOX_INSTANCE)]
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

pub struct BatteryClient {
    session: CentralSession,
}

impl BatteryClient {
    pub fn new(transport: Arc<dyn GattTransport>, callback: Arc<dyn CentralCallback>) -> Self {
        Self::with_config(GattConfig::for_profile(Profile::BatteryService), transport, callback)
    }

    pub fn with_config(
        config: GattConfig,
        transport: Arc<dyn GattTransport>,
        callback: Arc<dyn CentralCallback>,
    ) -> Self {
        Self {
            session: CentralSession::new(Profile::BatteryService, config, transport, callback),
        }
    }

    pub fn session(&self) -> &CentralSession {
        &self.session
    }

    /// Level of the first battery service instance, in percent.
    pub async fn read_battery_level(&self) -> GattResult<u8> {
        let value = self
            .session
            .read(BATTERY_SERVICE, BATTERY_LEVEL_CHARACTERISTIC)
            .await?;
        level_from(&value)
    }

    /// Levels of every battery service instance, keyed by instance id.
    pub async fn read_battery_levels(&self) -> GattResult<Vec<(u16, u8)>> {
        let values = self
            .session
            .read_all(BATTERY_SERVICE, BATTERY_LEVEL_CHARACTERISTIC)
            .await?;
        values
            .into_iter()
            .map(|(char_ref, value)| {
                let level = level_from(&value)?;
                debug!(
                    "Battery level [{}] for service instance [{}]",
                    level, char_ref.service_instance
                );
                Ok((char_ref.service_instance, level))
            })
            .collect()
    }
}

fn level_from(value: &[u8]) -> GattResult<u8> {
    value
        .first()
        .copied()
        .ok_or(GattError::EmptyReadResponse {
            characteristic: BATTERY_LEVEL_CHARACTERISTIC,
        })
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// Simulated battery levels: even for the default instance, odd for the box.
#[derive(Debug, Default)]
pub struct BatteryServer;

impl BatteryServer {
    pub fn session(config: GattConfig, transport: Arc<dyn GattServerTransport>) -> PeripheralSession {
        PeripheralSession::new(Profile::BatteryService, config, transport, Arc::new(BatteryServer))
    }
}

impl PeripheralHandler for BatteryServer {
    fn on_read_request(
        &self,
        _peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Option<Vec<u8>> {
        if characteristic.characteristic != BATTERY_LEVEL_CHARACTERISTIC {
            return None;
        }

        let mut rng = rand::thread_rng();
        let level = match characteristic.service_instance {
            DEFAULT_INSTANCE => rng.gen_range(1..=50u8) * 2,
            BOX_INSTANCE => rng.gen_range(1..=50u8) * 2 - 1,
            other => {
                warn!("Unknown battery service instance {}", other);
                0
            }
        };
        debug!(
            "On read request, battery level [{}] service instance [{}]",
            level, characteristic.service_instance
        );
        Some(vec![level])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_ref(instance: u16) -> CharacteristicRef {
        CharacteristicRef {
            service: BATTERY_SERVICE,
            service_instance: instance,
            characteristic: BATTERY_LEVEL_CHARACTERISTIC,
        }
    }

    #[test]
    fn test_level_parity_per_instance() {
        let server = BatteryServer;
        let peer = PeerAddress::new([1, 2, 3, 4, 5, 6]);
        for _ in 0..100 {
            let even = server.on_read_request(&peer, &level_ref(DEFAULT_INSTANCE)).unwrap()[0];
            assert!(even % 2 == 0 && (2..=100).contains(&even));
            let odd = server.on_read_request(&peer, &level_ref(BOX_INSTANCE)).unwrap()[0];
            assert!(odd % 2 == 1 && (1..=99).contains(&odd));
        }
    }

    #[test]
    fn test_empty_level() {
        assert_eq!(level_from(&[42, 1]), Ok(42));
        assert!(matches!(level_from(&[]), Err(GattError::EmptyReadResponse { .. })));
    }
}
