//! In-process loopback link
//!
//! `LoopbackLink` connects one central session to one peripheral session
//! without a radio. It implements both transport traits and delivers every
//! event asynchronously, in order, on a per-direction tokio task, the way a
//! real stack reports completions on its own thread.
//!
//! The link models the parts of GATT the sessions rely on: connection setup
//! against an advertising server, service discovery, reads through the
//! server's read handler, long writes as prepared fragments plus an execute,
//! MTU exchange, client configuration writes and notifications gated on
//! subscription.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use blex_core::types::CLIENT_CHARACTERISTIC_CONFIG;
use blex_core::{
    CharacteristicRef, ConnectionState, GattError, GattResult, GattService, GattStatus,
    OperationKind, PeerAddress,
};

use crate::advertising::AdvertiseSettings;
use crate::coordinator::ATT_HEADER_SIZE;
use crate::transport::{GattEventSink, GattServerEventSink, GattServerTransport, GattTransport};

/// ATT MTU before any exchange.
pub const DEFAULT_ATT_MTU: usize = 23;
/// Largest ATT MTU a stack agrees to.
pub const MAX_ATT_MTU: usize = 517;

/// Random static device address.
pub fn random_address() -> PeerAddress {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill(&mut bytes);
    bytes[0] |= 0xC0;
    PeerAddress::new(bytes)
}

type Delivery = Box<dyn FnOnce(&LinkInner) + Send>;

#[derive(Debug)]
struct ServerState {
    open: bool,
    advertising: Option<(AdvertiseSettings, Vec<u8>)>,
    services: Vec<GattService>,
    connected: bool,
    att_mtu: usize,
    subscriptions: HashSet<CharacteristicRef>,
    add_service_status: GattStatus,
}

impl ServerState {
    fn disconnect(&mut self) -> bool {
        let was_connected = std::mem::replace(&mut self.connected, false);
        self.att_mtu = DEFAULT_ATT_MTU;
        self.subscriptions.clear();
        was_connected
    }

    fn characteristic_has_cccd(&self, characteristic: &CharacteristicRef) -> bool {
        self.services
            .iter()
            .filter(|service| {
                service.uuid == characteristic.service
                    && service.instance_id == characteristic.service_instance
            })
            .filter_map(|service| service.characteristic(&characteristic.characteristic))
            .any(|c| c.has_descriptor(&CLIENT_CHARACTERISTIC_CONFIG))
    }
}

struct LinkInner {
    central_address: PeerAddress,
    peripheral_address: PeerAddress,
    central_sink: Mutex<Option<Weak<dyn GattEventSink>>>,
    server_sink: Mutex<Option<Weak<dyn GattServerEventSink>>>,
    server: Mutex<ServerState>,
    central_queue: mpsc::UnboundedSender<Delivery>,
    server_queue: mpsc::UnboundedSender<Delivery>,
}

/// A central and a peripheral joined in process. Clones share the link.
#[derive(Clone)]
pub struct LoopbackLink {
    inner: Arc<LinkInner>,
}

impl LoopbackLink {
    /// Create a link between two random addresses. Must be called from
    /// within a tokio runtime.
    pub fn new() -> Self {
        Self::with_addresses(random_address(), random_address())
    }

    pub fn with_addresses(central_address: PeerAddress, peripheral_address: PeerAddress) -> Self {
        let (central_queue, central_deliveries) = mpsc::unbounded_channel();
        let (server_queue, server_deliveries) = mpsc::unbounded_channel();
        let inner = Arc::new(LinkInner {
            central_address,
            peripheral_address,
            central_sink: Mutex::new(None),
            server_sink: Mutex::new(None),
            server: Mutex::new(ServerState {
                open: false,
                advertising: None,
                services: Vec::new(),
                connected: false,
                att_mtu: DEFAULT_ATT_MTU,
                subscriptions: HashSet::new(),
                add_service_status: GattStatus::SUCCESS,
            }),
            central_queue,
            server_queue,
        });
        spawn_delivery("central", Arc::downgrade(&inner), central_deliveries);
        spawn_delivery("server", Arc::downgrade(&inner), server_deliveries);
        Self { inner }
    }

    pub fn central_address(&self) -> PeerAddress {
        self.inner.central_address
    }

    pub fn peripheral_address(&self) -> PeerAddress {
        self.inner.peripheral_address
    }

    pub fn central_transport(&self) -> Arc<dyn GattTransport> {
        Arc::new(LoopbackCentral(Arc::clone(&self.inner)))
    }

    pub fn peripheral_transport(&self) -> Arc<dyn GattServerTransport> {
        Arc::new(LoopbackPeripheral(Arc::clone(&self.inner)))
    }

    /// Route central-side events to `sink`. The link keeps a weak reference.
    pub fn bind_central(&self, sink: Arc<dyn GattEventSink>) {
        *self.inner.central_sink.lock() = Some(Arc::downgrade(&sink));
    }

    /// Route server-side events to `sink`. The link keeps a weak reference.
    pub fn bind_peripheral(&self, sink: Arc<dyn GattServerEventSink>) {
        *self.inner.server_sink.lock() = Some(Arc::downgrade(&sink));
    }

    /// Payload currently advertised, as a scanner would receive it.
    pub fn advertisement(&self) -> Option<Vec<u8>> {
        self.inner
            .server
            .lock()
            .advertising
            .as_ref()
            .map(|(_, payload)| payload.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.server.lock().connected
    }

    /// Status reported for subsequent service registrations.
    pub fn set_add_service_status(&self, status: GattStatus) {
        self.inner.server.lock().add_service_status = status;
    }

    /// Tear the link down from below, as a supervision timeout would.
    pub fn drop_connection(&self, status: GattStatus) {
        let inner = &self.inner;
        inner.to_server(move |link, sink| {
            if !link.server.lock().disconnect() {
                return;
            }
            sink.on_connection_state(&link.central_address, ConnectionState::Disconnected, status);
            link.to_central(move |link, sink| {
                sink.on_connection_state(
                    &link.peripheral_address,
                    ConnectionState::Disconnected,
                    status,
                )
            });
        });
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackLink")
            .field("central", &self.inner.central_address)
            .field("peripheral", &self.inner.peripheral_address)
            .finish()
    }
}

fn spawn_delivery(
    name: &'static str,
    link: Weak<LinkInner>,
    mut queue: mpsc::UnboundedReceiver<Delivery>,
) {
    tokio::spawn(async move {
        while let Some(delivery) = queue.recv().await {
            let Some(link) = link.upgrade() else {
                break;
            };
            delivery(&link);
        }
        trace!("Loopback {} delivery stopped", name);
    });
}

impl LinkInner {
    fn to_central<F>(&self, event: F)
    where
        F: FnOnce(&LinkInner, &dyn GattEventSink) + Send + 'static,
    {
        let delivery: Delivery = Box::new(move |link| {
            let sink = link.central_sink.lock().as_ref().and_then(Weak::upgrade);
            match sink {
                Some(sink) => event(link, sink.as_ref()),
                None => debug!("No central bound, event dropped"),
            }
        });
        if self.central_queue.send(delivery).is_err() {
            debug!("Central delivery closed");
        }
    }

    fn to_server<F>(&self, event: F)
    where
        F: FnOnce(&LinkInner, &dyn GattServerEventSink) + Send + 'static,
    {
        let delivery: Delivery = Box::new(move |link| {
            let sink = link.server_sink.lock().as_ref().and_then(Weak::upgrade);
            match sink {
                Some(sink) => event(link, sink.as_ref()),
                None => debug!("No server bound, event dropped"),
            }
        });
        if self.server_queue.send(delivery).is_err() {
            debug!("Server delivery closed");
        }
    }

    fn report(&self, op: OperationKind, status: GattStatus, uuid: Option<uuid::Uuid>) {
        self.to_central(move |link, sink| {
            sink.on_operation_result(&link.peripheral_address, op, status, uuid)
        });
    }

    fn check_peer(&self, peer: &PeerAddress, op: OperationKind) -> GattResult<()> {
        if *peer != self.peripheral_address {
            return Err(GattError::TransportRejected {
                op,
                reason: format!("unknown device {}", peer),
            });
        }
        if op != OperationKind::Connect && !self.server.lock().connected {
            return Err(GattError::NotConnected);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Central Side
// ----------------------------------------------------------------------------

struct LoopbackCentral(Arc<LinkInner>);

impl GattTransport for LoopbackCentral {
    fn connect(&self, peer: &PeerAddress) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::Connect)?;
        self.0.to_server(|link, sink| {
            let accepted = {
                let mut server = link.server.lock();
                let connectable = server.open
                    && server
                        .advertising
                        .as_ref()
                        .is_some_and(|(settings, _)| settings.connectable);
                if connectable {
                    server.connected = true;
                }
                connectable
            };

            if !accepted {
                debug!("Peripheral not advertising, connection refused");
                link.to_central(|link, sink| {
                    sink.on_connection_state(
                        &link.peripheral_address,
                        ConnectionState::Disconnected,
                        GattStatus::ERROR,
                    )
                });
                return;
            }

            sink.on_connection_state(
                &link.central_address,
                ConnectionState::Connected,
                GattStatus::SUCCESS,
            );
            link.to_central(|link, sink| {
                sink.on_connection_state(
                    &link.peripheral_address,
                    ConnectionState::Connected,
                    GattStatus::SUCCESS,
                )
            });
        });
        Ok(())
    }

    fn disconnect(&self, peer: &PeerAddress) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::Disconnect)?;
        self.0.to_server(|link, sink| {
            if link.server.lock().disconnect() {
                sink.on_connection_state(
                    &link.central_address,
                    ConnectionState::Disconnected,
                    GattStatus::SUCCESS,
                );
            }
            link.to_central(|link, sink| {
                sink.on_connection_state(
                    &link.peripheral_address,
                    ConnectionState::Disconnected,
                    GattStatus::SUCCESS,
                )
            });
        });
        Ok(())
    }

    fn discover_services(&self, peer: &PeerAddress) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::DiscoverServices)?;
        self.0.to_server(|link, _| {
            let services = link.server.lock().services.clone();
            link.to_central(move |link, sink| {
                sink.on_services_discovered(&link.peripheral_address, services);
                sink.on_operation_result(
                    &link.peripheral_address,
                    OperationKind::DiscoverServices,
                    GattStatus::SUCCESS,
                    None,
                );
            });
        });
        Ok(())
    }

    fn read_characteristic(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::ReadCharacteristic)?;
        let characteristic = *characteristic;
        self.0.to_server(move |link, sink| {
            let response =
                sink.on_characteristic_read_request(&link.central_address, &characteristic, 0);
            link.to_central(move |link, sink| {
                if response.status.is_success() {
                    sink.on_characteristic_changed(
                        &link.peripheral_address,
                        &characteristic,
                        &response.value,
                    );
                }
                sink.on_operation_result(
                    &link.peripheral_address,
                    OperationKind::ReadCharacteristic,
                    response.status,
                    Some(characteristic.characteristic),
                );
            });
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::WriteCharacteristic)?;
        let characteristic = *characteristic;
        let value = value.to_vec();
        self.0.to_server(move |link, sink| {
            let payload_size = link.server.lock().att_mtu - ATT_HEADER_SIZE;
            let central = link.central_address;

            let status = if value.len() <= payload_size {
                sink.on_characteristic_write_request(&central, &characteristic, false, 0, &value)
            } else {
                let mut status = GattStatus::SUCCESS;
                for (index, fragment) in value.chunks(payload_size).enumerate() {
                    status = sink.on_characteristic_write_request(
                        &central,
                        &characteristic,
                        true,
                        index * payload_size,
                        fragment,
                    );
                    if !status.is_success() {
                        break;
                    }
                }
                if status.is_success() {
                    sink.on_execute_write(&central, true)
                } else {
                    sink.on_execute_write(&central, false);
                    status
                }
            };
            link.report(
                OperationKind::WriteCharacteristic,
                status,
                Some(characteristic.characteristic),
            );
        });
        Ok(())
    }

    fn configure_mtu(&self, peer: &PeerAddress, mtu: usize) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::ConfigureMtu)?;
        self.0.to_server(move |link, sink| {
            let agreed = mtu.clamp(DEFAULT_ATT_MTU, MAX_ATT_MTU);
            link.server.lock().att_mtu = agreed;
            sink.on_mtu_changed(&link.central_address, agreed);
            link.to_central(move |link, sink| {
                sink.on_mtu_changed(&link.peripheral_address, agreed);
                sink.on_operation_result(
                    &link.peripheral_address,
                    OperationKind::ConfigureMtu,
                    GattStatus::SUCCESS,
                    None,
                );
            });
        });
        Ok(())
    }

    fn subscribe(&self, peer: &PeerAddress, characteristic: &CharacteristicRef) -> GattResult<()> {
        self.0.check_peer(peer, OperationKind::WriteDescriptor)?;
        let characteristic = *characteristic;
        self.0.to_server(move |link, sink| {
            let has_cccd = link.server.lock().characteristic_has_cccd(&characteristic);
            let status = if has_cccd {
                sink.on_descriptor_write_request(
                    &link.central_address,
                    &characteristic,
                    CLIENT_CHARACTERISTIC_CONFIG,
                    &[0x01, 0x00],
                )
            } else {
                GattStatus::SUCCESS
            };
            if status.is_success() {
                link.server.lock().subscriptions.insert(characteristic);
            }
            link.report(
                OperationKind::WriteDescriptor,
                status,
                Some(characteristic.characteristic),
            );
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Peripheral Side
// ----------------------------------------------------------------------------

struct LoopbackPeripheral(Arc<LinkInner>);

impl GattServerTransport for LoopbackPeripheral {
    fn open(&self) -> GattResult<()> {
        self.0.server.lock().open = true;
        Ok(())
    }

    fn add_service(&self, service: &GattService) -> GattResult<()> {
        let status = {
            let mut server = self.0.server.lock();
            if !server.open {
                return Err(GattError::ServerNotStarted);
            }
            if server.add_service_status.is_success() {
                server.services.push(service.clone());
            }
            server.add_service_status
        };
        let uuid = service.uuid;
        self.0
            .to_server(move |_, sink| sink.on_service_added(status, uuid));
        Ok(())
    }

    fn start_advertising(&self, settings: &AdvertiseSettings, payload: &[u8]) -> GattResult<()> {
        let mut server = self.0.server.lock();
        if !server.open {
            return Err(GattError::ServerNotStarted);
        }
        debug!("Advertising {} ({:?})", hex::encode(payload), settings.mode);
        server.advertising = Some((settings.clone(), payload.to_vec()));
        Ok(())
    }

    fn stop_advertising(&self) {
        self.0.server.lock().advertising = None;
    }

    fn notify_characteristic_changed(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
        _confirm: bool,
    ) -> GattResult<()> {
        if *peer != self.0.central_address || !self.0.server.lock().connected {
            return Err(GattError::NotConnected);
        }

        let characteristic = *characteristic;
        let value = value.to_vec();
        self.0.to_central(move |link, sink| {
            if link.server.lock().subscriptions.contains(&characteristic) {
                sink.on_characteristic_changed(&link.peripheral_address, &characteristic, &value);
            } else {
                debug!(
                    "Central not subscribed to {}, notification dropped",
                    characteristic.characteristic
                );
            }
            link.to_server(|link, sink| {
                sink.on_notification_sent(&link.central_address, GattStatus::SUCCESS)
            });
        });
        Ok(())
    }

    fn close(&self) {
        let was_connected = {
            let mut server = self.0.server.lock();
            server.open = false;
            server.advertising = None;
            server.services.clear();
            server.disconnect()
        };
        if was_connected {
            self.0.to_central(|link, sink| {
                sink.on_connection_state(
                    &link.peripheral_address,
                    ConnectionState::Disconnected,
                    GattStatus::SUCCESS,
                )
            });
        }
    }
}
