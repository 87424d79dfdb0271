//! Peripheral (GATT server) session
//!
//! A `PeripheralSession` registers the profile's services, advertises, and
//! answers requests from connected centrals. Outbound data is segmented and
//! sent as notifications, one packet per coordinated operation. Inbound writes,
//! including prepared (long) writes, are reassembled per peer and
//! characteristic and handed to the [`PeripheralHandler`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use blex_core::{
    CharacteristicRef, ConnectionState, GattError, GattResult, GattService, GattStatus,
    OperationKind, OperationTarget, PacketCodec, PacketWorker, PeerAddress,
};

use crate::config::GattConfig;
use crate::coordinator::GattCoordinator;
use crate::executor::SerialExecutor;
use crate::pending_write::PendingWrites;
use crate::profile::Profile;
use crate::transport::{GattResponse, GattServerEventSink, GattServerTransport};

/// Client configuration value enabling notifications.
pub const CCCD_ENABLE_NOTIFICATION: [u8; 2] = [0x01, 0x00];
/// Client configuration value disabling notifications.
pub const CCCD_DISABLE_NOTIFICATION: [u8; 2] = [0x00, 0x00];

// ----------------------------------------------------------------------------
// Handler
// ----------------------------------------------------------------------------

/// Application side of a peripheral session.
///
/// `on_read_request` is answered synchronously on the transport's event
/// path. Every other method runs on the session's callback executor.
pub trait PeripheralHandler: Send + Sync + 'static {
    fn on_started(&self, _session: &PeripheralSession) {}
    fn on_stopped(&self) {}
    /// Value for a read request; `None` answers with a failure status.
    fn on_read_request(
        &self,
        _peer: &PeerAddress,
        _characteristic: &CharacteristicRef,
    ) -> Option<Vec<u8>> {
        None
    }
    /// A complete message written by a central.
    fn on_message(
        &self,
        _session: &PeripheralSession,
        _peer: &PeerAddress,
        _characteristic: &CharacteristicRef,
        _data: &[u8],
    ) {
    }
    fn on_connection_changed(&self, _peer: &PeerAddress, _state: ConnectionState) {}
    fn on_subscription_changed(&self, _peer: &PeerAddress, _subscribed: bool) {}
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Handle to a peripheral session. Clones share the same session.
#[derive(Clone)]
pub struct PeripheralSession {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    profile: Profile,
    config: GattConfig,
    transport: Arc<dyn GattServerTransport>,
    coordinator: GattCoordinator,
    handler: Arc<dyn PeripheralHandler>,
    worker: SerialExecutor,
    main: SerialExecutor,
    services: Vec<GattService>,
    started: AtomicBool,
    connected: Mutex<HashSet<PeerAddress>>,
    registered: Mutex<HashSet<PeerAddress>>,
    pending_writes: Mutex<PendingWrites>,
    receivers: Mutex<HashMap<(PeerAddress, CharacteristicRef), PacketCodec>>,
    this: Weak<PeripheralInner>,
}

impl PeripheralSession {
    /// Create a session. Must be called from within a tokio runtime.
    pub fn new(
        profile: Profile,
        config: GattConfig,
        transport: Arc<dyn GattServerTransport>,
        handler: Arc<dyn PeripheralHandler>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| PeripheralInner {
            profile,
            coordinator: GattCoordinator::new(&config),
            pending_writes: Mutex::new(PendingWrites::new(
                config.prepared_write_initial_capacity,
                config.prepared_write_limit,
            )),
            config,
            transport,
            handler,
            worker: SerialExecutor::spawn("ble-peripheral-op"),
            main: SerialExecutor::spawn("ble-peripheral-callback"),
            services: profile.services(),
            started: AtomicBool::new(false),
            connected: Mutex::new(HashSet::new()),
            registered: Mutex::new(HashSet::new()),
            receivers: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn event_sink(&self) -> Arc<dyn GattServerEventSink> {
        self.inner.clone()
    }

    pub fn profile(&self) -> Profile {
        self.inner.profile
    }

    pub fn services(&self) -> &[GattService] {
        &self.inner.services
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn coordinator(&self) -> &GattCoordinator {
        &self.inner.coordinator
    }

    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.inner.connected.lock().iter().copied().collect()
    }

    /// Peers that asked for notifications.
    pub fn registered_peers(&self) -> Vec<PeerAddress> {
        self.inner.registered.lock().iter().copied().collect()
    }

    /// Register every service, then start advertising. On failure the server
    /// is closed again.
    pub async fn start(&self) -> GattResult<()> {
        self.submit(|inner| async move { inner.start().await }).await
    }

    /// Stop advertising and close the server. In-flight operations fail.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping GATT server for {}", inner.profile);
        inner.transport.stop_advertising();
        inner.transport.close();
        inner.coordinator.fail_all(GattError::ServerNotStarted);
        inner.connected.lock().clear();
        inner.registered.lock().clear();
        inner.pending_writes.lock().clear();
        inner.receivers.lock().clear();
        inner.dispatch(|handler, _| handler.on_stopped());
    }

    /// Send `data` to `peer` as notifications, segmented to its payload size.
    pub async fn send_data(
        &self,
        peer: PeerAddress,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> GattResult<()> {
        self.submit(move |inner| async move {
            inner.send_data(peer, service, characteristic, data).await
        })
        .await
    }

    /// Queue a send without waiting for it; failures are logged.
    pub fn post_send_data(
        &self,
        peer: PeerAddress,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) {
        let inner = Arc::clone(&self.inner);
        let queued = self.inner.worker.post(async move {
            if let Err(error) = inner.send_data(peer, service, characteristic, data).await {
                warn!("Failed to send data to {}: {}", peer, error);
            }
        });
        if queued.is_err() {
            debug!("Worker closed, dropping send to {}", peer);
        }
    }

    /// Send `data` to every registered peer. Returns how many received it.
    pub async fn notify_registered(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> GattResult<usize> {
        self.submit(move |inner| async move {
            let peers: Vec<PeerAddress> = inner.registered.lock().iter().copied().collect();
            if peers.is_empty() {
                debug!("No devices registered, notification discarded");
                return Ok(0);
            }

            let mut delivered = 0;
            for peer in peers {
                match inner
                    .send_data(peer, service, characteristic, data.clone())
                    .await
                {
                    Ok(()) => delivered += 1,
                    Err(error) => warn!("Notification to {} failed: {}", peer, error),
                }
            }
            Ok(delivered)
        })
        .await
    }

    async fn submit<F, Fut, T>(&self, job: F) -> GattResult<T>
    where
        F: FnOnce(Arc<PeripheralInner>) -> Fut,
        Fut: Future<Output = GattResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.worker.run(job(Arc::clone(&self.inner))).await
    }
}

impl std::fmt::Debug for PeripheralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralSession")
            .field("profile", &self.inner.profile)
            .field("started", &self.is_started())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

impl PeripheralInner {
    async fn start(&self) -> GattResult<()> {
        if self.started.load(Ordering::SeqCst) {
            debug!("GATT server for {} already started", self.profile);
            return Ok(());
        }

        let payload = self.profile.advertisement(&self.config.device_name).build()?;
        self.transport.open()?;

        for service in &self.services {
            let result = self
                .coordinator
                .execute_local(OperationKind::AddService, Some(service.uuid), || {
                    self.transport.add_service(service)
                })
                .await;
            if let Err(error) = result {
                warn!("Failed to add service {}: {}", service.uuid, error);
                self.transport.close();
                return Err(error);
            }
            debug!(
                "Service {} (instance {}) added",
                service.uuid, service.instance_id
            );
        }

        let settings = self.profile.advertise_settings();
        if let Err(error) = self.transport.start_advertising(&settings, &payload) {
            warn!("Failed to start advertising: {}", error);
            self.transport.close();
            return Err(error);
        }

        self.started.store(true, Ordering::SeqCst);
        info!("GATT server for {} started", self.profile);
        self.dispatch(|handler, session| handler.on_started(session));
        Ok(())
    }

    async fn send_data(
        &self,
        peer: PeerAddress,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> GattResult<()> {
        if data.is_empty() {
            warn!("Zero length data for {}, ignored", characteristic);
            return Ok(());
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(GattError::ServerNotStarted);
        }
        if !self.connected.lock().contains(&peer) {
            return Err(GattError::NotConnected);
        }

        let char_ref = self.find_characteristic(service, characteristic)?;
        let target = OperationTarget::from(peer);
        let codec = PacketCodec::new(self.profile.codec(), self.coordinator.payload_size(&target))?;
        for packet in codec.segment(&data)? {
            if self.config.log.data_log {
                trace!("Notify {} with {}", peer, hex::encode(&packet));
            }
            self.coordinator
                .execute(
                    &target,
                    OperationKind::WriteCharacteristic,
                    Some(characteristic),
                    || {
                        self.transport
                            .notify_characteristic_changed(&peer, &char_ref, &packet, false)
                    },
                )
                .await?;
        }
        Ok(())
    }

    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> GattResult<CharacteristicRef> {
        let mut matching = self.services.iter().filter(|s| s.uuid == service).peekable();
        if matching.peek().is_none() {
            return Err(GattError::ServiceNotFound { service });
        }
        matching
            .find_map(|s| s.characteristic_ref(&characteristic))
            .ok_or(GattError::CharacteristicNotFound { characteristic })
    }

    /// Feed one inbound write into the peer's reassembly state.
    fn deliver(&self, peer: &PeerAddress, characteristic: &CharacteristicRef, value: &[u8]) {
        let payload_size = self.coordinator.payload_size(&OperationTarget::from(*peer));
        let mut messages = Vec::new();
        let result = {
            let mut receivers = self.receivers.lock();
            let codec = match receivers.entry((*peer, *characteristic)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match PacketCodec::new(self.profile.codec(), payload_size) {
                    Ok(codec) => entry.insert(codec),
                    Err(error) => {
                        warn!("Cannot create packet codec: {}", error);
                        return;
                    }
                },
            };
            codec.feed(value, &mut |message| messages.push(message))
        };
        if let Err(error) = result {
            warn!("Malformed packet from {}: {}", peer, error);
        }

        for message in messages {
            let peer = *peer;
            let characteristic = *characteristic;
            self.dispatch(move |handler, session| {
                handler.on_message(session, &peer, &characteristic, &message)
            });
        }
    }

    fn dispatch<F>(&self, event: F)
    where
        F: FnOnce(&dyn PeripheralHandler, &PeripheralSession) + Send + 'static,
    {
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        let handler = Arc::clone(&self.handler);
        let session = PeripheralSession { inner };
        if self
            .main
            .post(async move { event(handler.as_ref(), &session) })
            .is_err()
        {
            debug!("Callback executor closed, dropping event");
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

impl GattServerEventSink for PeripheralInner {
    fn on_connection_state(&self, peer: &PeerAddress, state: ConnectionState, status: GattStatus) {
        debug!("Peer {} is {} ({})", peer, state, status);
        match state {
            ConnectionState::Connected => {
                self.connected.lock().insert(*peer);
                if self.profile.notify_all_connected() {
                    self.registered.lock().insert(*peer);
                }
            }
            ConnectionState::Disconnected => {
                self.connected.lock().remove(peer);
                self.registered.lock().remove(peer);
                self.pending_writes.lock().cancel(peer);
                self.receivers.lock().retain(|(owner, _), _| owner != peer);
                self.coordinator.remove(&OperationTarget::from(*peer));
            }
            _ => {}
        }
        let peer = *peer;
        self.dispatch(move |handler, _| handler.on_connection_changed(&peer, state));
    }

    fn on_service_added(&self, status: GattStatus, service: Uuid) {
        self.coordinator.resolve(
            &OperationTarget::Adapter,
            OperationKind::AddService,
            status,
            Some(service),
        );
    }

    fn on_characteristic_read_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        offset: usize,
    ) -> GattResponse {
        match self.handler.on_read_request(peer, characteristic) {
            Some(value) if offset <= value.len() => GattResponse::success(value[offset..].to_vec()),
            Some(value) => {
                warn!("Read offset {} past value length {}", offset, value.len());
                GattResponse::failure(GattStatus::INVALID_OFFSET)
            }
            None => {
                warn!(
                    "No value for read of {} from {}",
                    characteristic.characteristic, peer
                );
                GattResponse::failure(GattStatus::FAILURE)
            }
        }
    }

    fn on_characteristic_write_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        prepared: bool,
        offset: usize,
        value: &[u8],
    ) -> GattStatus {
        if self.config.log.data_log {
            trace!(
                "Write from {} on {} (prepared: {}, offset: {}): {}",
                peer,
                characteristic.characteristic,
                prepared,
                offset,
                hex::encode(value)
            );
        }

        if !prepared {
            self.deliver(peer, characteristic, value);
            return GattStatus::SUCCESS;
        }
        match self.pending_writes.lock().append(peer, characteristic, value) {
            Ok(()) => GattStatus::SUCCESS,
            Err(error) => {
                warn!("Prepared write from {} rejected: {}", peer, error);
                GattStatus::PREPARE_QUEUE_FULL
            }
        }
    }

    fn on_descriptor_read_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
    ) -> GattResponse {
        if self.profile.client_config_descriptor() != Some(descriptor) {
            warn!(
                "Unknown descriptor {} read on {}",
                descriptor, characteristic.characteristic
            );
            return GattResponse::failure(GattStatus::FAILURE);
        }

        let value = if self.registered.lock().contains(peer) {
            CCCD_ENABLE_NOTIFICATION
        } else {
            CCCD_DISABLE_NOTIFICATION
        };
        GattResponse::success(value.to_vec())
    }

    fn on_descriptor_write_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> GattStatus {
        if self.profile.client_config_descriptor() != Some(descriptor) {
            warn!(
                "Unknown descriptor {} write on {}",
                descriptor, characteristic.characteristic
            );
            return GattStatus::FAILURE;
        }

        let subscribed = if value == CCCD_ENABLE_NOTIFICATION {
            debug!("Subscribe device to notifications: {}", peer);
            self.registered.lock().insert(*peer);
            true
        } else if value == CCCD_DISABLE_NOTIFICATION {
            debug!("Unsubscribe device from notifications: {}", peer);
            self.registered.lock().remove(peer);
            false
        } else {
            warn!("Unexpected client configuration value {}", hex::encode(value));
            return GattStatus::FAILURE;
        };

        let peer = *peer;
        self.dispatch(move |handler, _| handler.on_subscription_changed(&peer, subscribed));
        GattStatus::SUCCESS
    }

    fn on_execute_write(&self, peer: &PeerAddress, execute: bool) -> GattStatus {
        let buffered = self.pending_writes.lock().take(peer);
        if !execute {
            debug!("Prepared writes from {} cancelled", peer);
            return GattStatus::SUCCESS;
        }
        for (characteristic, data) in buffered {
            if !data.is_empty() {
                self.deliver(peer, &characteristic, &data);
            }
        }
        GattStatus::SUCCESS
    }

    fn on_notification_sent(&self, peer: &PeerAddress, status: GattStatus) {
        self.coordinator.resolve(
            &OperationTarget::from(*peer),
            OperationKind::WriteCharacteristic,
            status,
            None,
        );
    }

    fn on_mtu_changed(&self, peer: &PeerAddress, mtu: usize) {
        self.coordinator.on_mtu_changed(&OperationTarget::from(*peer), mtu);
    }
}
