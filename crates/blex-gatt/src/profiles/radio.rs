//! Magic Radio: the server broadcasts two channels to every connected client

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use blex_core::{
    CharacteristicProperties, CharacteristicRef, GattCharacteristic, GattService, PeerAddress,
};

use crate::central::{CentralCallback, CentralSession};
use crate::config::GattConfig;
use crate::peripheral::{PeripheralHandler, PeripheralSession};
use crate::profile::Profile;
use crate::transport::{GattServerTransport, GattTransport};

pub const RADIO_SERVICE: Uuid = Uuid::from_u128(0x0000a002_0000_4b84_a28a_899f5a8b5f71);
pub const FM_ONE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000a002_1000_4b84_a28a_899f5a8b5f71);
pub const FM_TWO_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000a002_2000_4b84_a28a_899f5a8b5f71);

pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(30);

pub fn create_service() -> GattService {
    let properties = CharacteristicProperties::READ.union(CharacteristicProperties::NOTIFY);
    GattService::new(RADIO_SERVICE, 0)
        .with_characteristic(GattCharacteristic::new(FM_ONE_CHARACTERISTIC, properties))
        .with_characteristic(GattCharacteristic::new(FM_TWO_CHARACTERISTIC, properties))
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

/// Listens to both channels; messages arrive through the callback.
pub struct RadioClient {
    session: CentralSession,
}

impl RadioClient {
    pub fn new(transport: Arc<dyn GattTransport>, callback: Arc<dyn CentralCallback>) -> Self {
        Self {
            session: CentralSession::new(
                Profile::MagicRadio,
                GattConfig::for_profile(Profile::MagicRadio),
                transport,
                callback,
            ),
        }
    }

    pub fn session(&self) -> &CentralSession {
        &self.session
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RadioServer {
    message_id: AtomicU64,
}

impl RadioServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session(
        self: &Arc<Self>,
        config: GattConfig,
        transport: Arc<dyn GattServerTransport>,
    ) -> PeripheralSession {
        PeripheralSession::new(Profile::MagicRadio, config, transport, self.clone())
    }

    pub fn fm_one_data(&self) -> Vec<u8> {
        format!("FM one: message#{}", self.next_id()).into_bytes()
    }

    pub fn fm_two_data(&self) -> Vec<u8> {
        format!("FM two: message#{}", self.next_id()).into_bytes()
    }

    fn next_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish both channels to registered peers every `interval`, starting
    /// now. The task ends once the session stops.
    pub fn start_broadcast(
        self: &Arc<Self>,
        session: PeripheralSession,
        interval: Duration,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !session.is_started() {
                    debug!("Radio server stopped, broadcast ended");
                    break;
                }
                for (characteristic, data) in [
                    (FM_ONE_CHARACTERISTIC, server.fm_one_data()),
                    (FM_TWO_CHARACTERISTIC, server.fm_two_data()),
                ] {
                    debug!("Publish: {}", String::from_utf8_lossy(&data));
                    if let Err(error) = session
                        .notify_registered(RADIO_SERVICE, characteristic, data)
                        .await
                    {
                        warn!("Broadcast on {} failed: {}", characteristic, error);
                    }
                }
            }
        })
    }
}

impl PeripheralHandler for RadioServer {
    fn on_read_request(
        &self,
        _peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Option<Vec<u8>> {
        match characteristic.characteristic {
            FM_ONE_CHARACTERISTIC => Some(self.fm_one_data()),
            FM_TWO_CHARACTERISTIC => Some(self.fm_two_data()),
            _ => None,
        }
    }
}
