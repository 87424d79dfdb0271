//! Magic Ping: a client pings, the server acknowledges
//!
//! Messages travel over a single read/write/notify characteristic using the
//! tiny framing, so pings longer than one packet survive the trip.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use blex_core::{
    CharacteristicProperties, CharacteristicRef, GattCharacteristic, GattError, GattResult,
    GattService, PeerAddress,
};

use crate::central::{CentralCallback, CentralSession};
use crate::config::GattConfig;
use crate::peripheral::{PeripheralHandler, PeripheralSession};
use crate::profile::Profile;
use crate::transport::{GattServerTransport, GattTransport};

pub const PING_SERVICE: Uuid = Uuid::from_u128(0x0000a001_0000_4080_973d_fe81d6397f29);
pub const PING_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000a001_1000_4080_973d_fe81d6397f29);

pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(15);
pub const MTU_REQUEST: usize = 512;
pub const PING_INTERVAL: Duration = Duration::from_secs(60);

pub fn create_service() -> GattService {
    let properties = CharacteristicProperties::READ
        .union(CharacteristicProperties::WRITE)
        .union(CharacteristicProperties::NOTIFY);
    GattService::new(PING_SERVICE, 0)
        .with_characteristic(GattCharacteristic::new(PING_CHARACTERISTIC, properties))
}

pub fn ping_message(id: u64) -> String {
    format!("This is a Ping message#{} from MagicPingClient", id)
}

pub fn ack_message(ping: &str) -> String {
    format!("ACK{{{}}}", ping)
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

pub struct PingClient {
    session: CentralSession,
    message_id: Arc<AtomicU64>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl PingClient {
    pub fn new(transport: Arc<dyn GattTransport>, callback: Arc<dyn CentralCallback>) -> Self {
        Self::with_config(GattConfig::for_profile(Profile::MagicPing), transport, callback)
    }

    pub fn with_config(
        config: GattConfig,
        transport: Arc<dyn GattTransport>,
        callback: Arc<dyn CentralCallback>,
    ) -> Self {
        Self {
            session: CentralSession::new(Profile::MagicPing, config, transport, callback),
            message_id: Arc::new(AtomicU64::new(0)),
            periodic: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &CentralSession {
        &self.session
    }

    /// Send the next ping and return its text.
    pub async fn send_ping(&self) -> GattResult<String> {
        send_next(&self.session, &self.message_id).await
    }

    /// Ping every `interval`, starting now, until stopped or disconnected.
    pub fn start_periodic(&self, interval: Duration) {
        let session = self.session.clone();
        let message_id = Arc::clone(&self.message_id);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match send_next(&session, &message_id).await {
                    Ok(_) => {}
                    Err(GattError::NotConnected) => {
                        debug!("Link closed, periodic ping stopped");
                        break;
                    }
                    Err(error) => warn!("Periodic ping failed: {}", error),
                }
            }
        });

        if let Some(previous) = self.periodic.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop_periodic(&self) {
        if let Some(task) = self.periodic.lock().take() {
            task.abort();
        }
    }

    pub fn close(&self) {
        self.stop_periodic();
        self.session.close();
    }
}

impl Drop for PingClient {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}

async fn send_next(session: &CentralSession, message_id: &AtomicU64) -> GattResult<String> {
    let message = ping_message(message_id.fetch_add(1, Ordering::SeqCst) + 1);
    session
        .write(PING_SERVICE, PING_CHARACTERISTIC, message.clone().into_bytes())
        .await?;
    Ok(message)
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// Answers every ping with `ACK{<ping>}`.
#[derive(Debug, Default)]
pub struct PingServer;

impl PingServer {
    pub fn session(config: GattConfig, transport: Arc<dyn GattServerTransport>) -> PeripheralSession {
        PeripheralSession::new(Profile::MagicPing, config, transport, Arc::new(PingServer))
    }
}

impl PeripheralHandler for PingServer {
    fn on_message(
        &self,
        session: &PeripheralSession,
        peer: &PeerAddress,
        _characteristic: &CharacteristicRef,
        data: &[u8],
    ) {
        let ping = String::from_utf8_lossy(data);
        debug!("Received data[{}] from [{}]", ping, peer);
        session.post_send_data(
            *peer,
            PING_SERVICE,
            PING_CHARACTERISTIC,
            ack_message(&ping).into_bytes(),
        );
    }
}
