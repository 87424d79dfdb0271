//! Central (GATT client) session
//!
//! A `CentralSession` manages one connection to a remote peripheral. Public
//! operations are queued on a dedicated worker executor and each GATT step is
//! driven through the [`GattCoordinator`]. Transport events arrive through the
//! session's [`GattEventSink`]; user callbacks are delivered on a separate
//! callback executor, in order.
//!
//! After the link comes up the session discovers services on its own, then
//! applies the profile: it requests the preferred MTU and subscribes to the
//! profile's notify characteristics.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
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
use crate::profile::Profile;
use crate::transport::{GattEventSink, GattTransport};

// ----------------------------------------------------------------------------
// Callback
// ----------------------------------------------------------------------------

/// Observer of a central session. All methods run on the session's callback
/// executor, never concurrently.
pub trait CentralCallback: Send + Sync + 'static {
    fn on_state_changed(&self, _peer: &PeerAddress, _state: ConnectionState) {}
    fn on_services_discovered(&self, _peer: &PeerAddress, _services: &[GattService]) {}
    /// A complete message reassembled from notifications or read values.
    fn on_message(&self, _peer: &PeerAddress, _characteristic: &CharacteristicRef, _data: &[u8]) {}
    fn on_operation_failed(&self, _error: &GattError) {}
}

/// Callback that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl CentralCallback for NoopCallback {}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct LinkState {
    peer: Option<PeerAddress>,
    state: ConnectionState,
    services: Vec<GattService>,
}

/// Handle to a central session. Clones share the same session.
#[derive(Clone)]
pub struct CentralSession {
    inner: Arc<CentralInner>,
}

struct CentralInner {
    profile: Profile,
    config: GattConfig,
    transport: Arc<dyn GattTransport>,
    coordinator: GattCoordinator,
    callback: Arc<dyn CentralCallback>,
    worker: SerialExecutor,
    main: SerialExecutor,
    link: Mutex<LinkState>,
    receivers: Mutex<HashMap<CharacteristicRef, PacketCodec>>,
    read_values: Mutex<HashMap<CharacteristicRef, Vec<u8>>>,
    this: Weak<CentralInner>,
}

impl CentralSession {
    /// Create a session. Must be called from within a tokio runtime.
    ///
    /// The transport must be wired to [`event_sink`](Self::event_sink) before
    /// the first operation.
    pub fn new(
        profile: Profile,
        config: GattConfig,
        transport: Arc<dyn GattTransport>,
        callback: Arc<dyn CentralCallback>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| CentralInner {
            profile,
            coordinator: GattCoordinator::new(&config),
            config,
            transport,
            callback,
            worker: SerialExecutor::spawn("ble-central-op"),
            main: SerialExecutor::spawn("ble-central-callback"),
            link: Mutex::new(LinkState {
                peer: None,
                state: ConnectionState::Disconnected,
                services: Vec::new(),
            }),
            receivers: Mutex::new(HashMap::new()),
            read_values: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn event_sink(&self) -> Arc<dyn GattEventSink> {
        self.inner.clone()
    }

    pub fn profile(&self) -> Profile {
        self.inner.profile
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    pub fn peer(&self) -> Option<PeerAddress> {
        self.inner.link.lock().peer
    }

    pub fn services(&self) -> Vec<GattService> {
        self.inner.link.lock().services.clone()
    }

    pub fn coordinator(&self) -> &GattCoordinator {
        &self.inner.coordinator
    }

    /// Payload bytes per packet on the current link.
    pub fn payload_size(&self) -> usize {
        match self.peer() {
            Some(peer) => self.inner.coordinator.payload_size(&peer.into()),
            None => self.inner.config.default_payload_size,
        }
    }

    /// Connect to `peer`, closing any link to a different device first.
    pub async fn connect(&self, peer: PeerAddress) -> GattResult<()> {
        self.submit(move |inner| async move { inner.connect(peer).await })
            .await
    }

    /// Drop the link. In-flight operations fail with `NotConnected`.
    pub fn close(&self) {
        let inner = &self.inner;
        let peer = {
            let mut link = inner.link.lock();
            link.services.clear();
            link.peer.take()
        };
        let Some(peer) = peer else {
            return;
        };

        info!("Closing connection to {}", peer);
        if let Err(error) = inner.transport.disconnect(&peer) {
            warn!("Disconnect from {} failed: {}", peer, error);
        }
        inner
            .coordinator
            .fail_in_flight(&peer.into(), GattError::NotConnected);
        inner.receivers.lock().clear();
        inner.read_values.lock().clear();
        inner.update_state(peer, ConnectionState::Disconnected);
    }

    pub async fn discover_services(&self) -> GattResult<()> {
        self.submit(|inner| async move { inner.discover_services().await })
            .await
    }

    /// Request an ATT MTU; the usable payload becomes the agreed MTU minus 3.
    pub async fn request_mtu(&self, mtu: usize) -> GattResult<()> {
        self.submit(move |inner| async move { inner.request_mtu(mtu).await })
            .await
    }

    /// Read the first instance of a characteristic.
    pub async fn read(&self, service: Uuid, characteristic: Uuid) -> GattResult<Vec<u8>> {
        self.submit(move |inner| async move {
            let peer = inner.connected_peer()?;
            let refs = inner.find_characteristics(service, characteristic)?;
            inner.read_characteristic(peer, refs[0]).await
        })
        .await
    }

    /// Read a characteristic from every instance of `service`.
    pub async fn read_all(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> GattResult<Vec<(CharacteristicRef, Vec<u8>)>> {
        self.submit(move |inner| async move {
            let peer = inner.connected_peer()?;
            let mut values = Vec::new();
            for char_ref in inner.find_characteristics(service, characteristic)? {
                let value = inner.read_characteristic(peer, char_ref).await?;
                values.push((char_ref, value));
            }
            Ok(values)
        })
        .await
    }

    /// Send `data`, segmented to the current payload size. Stops at the first
    /// packet that fails. Empty data is ignored.
    pub async fn write(&self, service: Uuid, characteristic: Uuid, data: Vec<u8>) -> GattResult<()> {
        self.submit(move |inner| async move { inner.write(service, characteristic, data).await })
            .await
    }

    /// Enable notifications for a characteristic.
    pub async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> GattResult<()> {
        self.submit(move |inner| async move { inner.subscribe(service, characteristic).await })
            .await
    }

    async fn submit<F, Fut, T>(&self, job: F) -> GattResult<T>
    where
        F: FnOnce(Arc<CentralInner>) -> Fut,
        Fut: Future<Output = GattResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let result = self.inner.worker.run(job(Arc::clone(&self.inner))).await;
        if let Err(error) = &result {
            self.inner.report_failure(error.clone());
        }
        result
    }
}

impl std::fmt::Debug for CentralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.inner.link.lock();
        f.debug_struct("CentralSession")
            .field("profile", &self.inner.profile)
            .field("peer", &link.peer)
            .field("state", &link.state)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

impl CentralInner {
    async fn connect(&self, peer: PeerAddress) -> GattResult<()> {
        let previous = {
            let mut link = self.link.lock();
            if link.peer == Some(peer) && link.state == ConnectionState::Connected {
                debug!("Already connected to {}", peer);
                return Ok(());
            }
            link.services.clear();
            link.peer.replace(peer).filter(|previous| *previous != peer)
        };
        if let Some(previous) = previous {
            info!("Closing previous connection to {}", previous);
            if let Err(error) = self.transport.disconnect(&previous) {
                warn!("Disconnect from {} failed: {}", previous, error);
            }
            self.coordinator.remove(&previous.into());
            self.receivers.lock().clear();
        }

        info!("Connecting to {}", peer);
        self.update_state(peer, ConnectionState::Connecting);
        let result = self
            .coordinator
            .execute(&peer.into(), OperationKind::Connect, None, || {
                self.transport.connect(&peer)
            })
            .await;

        if result.is_err() && self.current_state(&peer) != Some(ConnectionState::Connected) {
            self.update_state(peer, ConnectionState::Disconnected);
        }
        result
    }

    async fn discover_services(&self) -> GattResult<()> {
        let peer = self.connected_peer()?;
        self.coordinator
            .execute(&peer.into(), OperationKind::DiscoverServices, None, || {
                self.transport.discover_services(&peer)
            })
            .await?;

        let services = self.link.lock().services.clone();
        for service in &services {
            debug!(
                "Service {} (instance {}) with {} characteristics",
                service.uuid,
                service.instance_id,
                service.characteristics.len()
            );
        }
        {
            let services = services.clone();
            self.dispatch(move |callback| callback.on_services_discovered(&peer, &services));
        }

        self.setup_profile(peer, &services).await;
        Ok(())
    }

    async fn setup_profile(&self, peer: PeerAddress, services: &[GattService]) {
        let primary = self.profile.primary_service();
        if !services.iter().any(|service| service.uuid == primary) {
            warn!("No {} service found on {}", self.profile, peer);
            return;
        }

        if let Some(mtu) = self.profile.preferred_mtu() {
            if let Err(error) = self.request_mtu(mtu).await {
                warn!("MTU request to {} failed: {}", peer, error);
            }
        }
        for characteristic in self.profile.notify_characteristics() {
            if let Err(error) = self.subscribe(primary, characteristic).await {
                warn!("Failed to subscribe to {}: {}", characteristic, error);
            }
        }
    }

    async fn request_mtu(&self, mtu: usize) -> GattResult<()> {
        let peer = self.connected_peer()?;
        self.coordinator
            .execute(&peer.into(), OperationKind::ConfigureMtu, None, || {
                self.transport.configure_mtu(&peer, mtu)
            })
            .await
    }

    async fn read_characteristic(
        &self,
        peer: PeerAddress,
        char_ref: CharacteristicRef,
    ) -> GattResult<Vec<u8>> {
        self.read_values.lock().remove(&char_ref);
        self.coordinator
            .execute(
                &peer.into(),
                OperationKind::ReadCharacteristic,
                Some(char_ref.characteristic),
                || self.transport.read_characteristic(&peer, &char_ref),
            )
            .await?;

        self.read_values
            .lock()
            .remove(&char_ref)
            .ok_or(GattError::EmptyReadResponse {
                characteristic: char_ref.characteristic,
            })
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, data: Vec<u8>) -> GattResult<()> {
        if data.is_empty() {
            warn!("Zero length data for {}, ignored", characteristic);
            return Ok(());
        }

        let peer = self.connected_peer()?;
        let char_ref = self.find_characteristics(service, characteristic)?[0];
        let target = OperationTarget::from(peer);
        let codec = PacketCodec::new(self.profile.codec(), self.coordinator.payload_size(&target))?;
        let packets = codec.segment(&data)?;
        debug!(
            "Sending {} bytes to {} in {} packets",
            data.len(),
            peer,
            packets.len()
        );

        for packet in packets {
            if self.config.log.data_log {
                trace!("Send packet {} to {}", hex::encode(&packet), peer);
            }
            self.coordinator
                .execute(
                    &target,
                    OperationKind::WriteCharacteristic,
                    Some(characteristic),
                    || self.transport.write_characteristic(&peer, &char_ref, &packet),
                )
                .await?;
        }
        Ok(())
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> GattResult<()> {
        let peer = self.connected_peer()?;
        let char_ref = self.find_characteristics(service, characteristic)?[0];
        debug!("Subscribing to {} on {}", characteristic, peer);
        self.coordinator
            .execute(
                &peer.into(),
                OperationKind::WriteDescriptor,
                Some(characteristic),
                || self.transport.subscribe(&peer, &char_ref),
            )
            .await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn connected_peer(&self) -> GattResult<PeerAddress> {
        let link = self.link.lock();
        match (link.peer, link.state) {
            (Some(peer), ConnectionState::Connected) => Ok(peer),
            _ => Err(GattError::NotConnected),
        }
    }

    fn current_state(&self, peer: &PeerAddress) -> Option<ConnectionState> {
        let link = self.link.lock();
        (link.peer == Some(*peer)).then_some(link.state)
    }

    /// Every instance of `characteristic` under services with uuid `service`.
    fn find_characteristics(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> GattResult<Vec<CharacteristicRef>> {
        let link = self.link.lock();
        let mut matching = link
            .services
            .iter()
            .filter(|candidate| candidate.uuid == service)
            .peekable();
        if matching.peek().is_none() {
            return Err(GattError::ServiceNotFound { service });
        }

        let refs: Vec<CharacteristicRef> = matching
            .filter_map(|candidate| candidate.characteristic_ref(&characteristic))
            .collect();
        if refs.is_empty() {
            return Err(GattError::CharacteristicNotFound { characteristic });
        }
        Ok(refs)
    }

    fn update_state(&self, peer: PeerAddress, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.link.lock().state, state);
        if previous == state {
            return;
        }
        debug!("Client state of {}: {} -> {}", peer, previous, state);
        self.dispatch(move |callback| callback.on_state_changed(&peer, state));
    }

    fn report_failure(&self, error: GattError) {
        warn!("Central operation failed: {}", error);
        self.dispatch(move |callback| callback.on_operation_failed(&error));
    }

    fn dispatch<F>(&self, event: F)
    where
        F: FnOnce(&dyn CentralCallback) + Send + 'static,
    {
        let callback = Arc::clone(&self.callback);
        if self.main.post(async move { event(callback.as_ref()) }).is_err() {
            debug!("Callback executor closed, dropping event");
        }
    }

    fn resolve_if_in_flight(&self, target: &OperationTarget, op: OperationKind, status: GattStatus) {
        if self.coordinator.snapshot(target).current_operation == Some(op) {
            self.coordinator.resolve(target, op, status, None);
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

impl GattEventSink for CentralInner {
    fn on_connection_state(&self, peer: &PeerAddress, state: ConnectionState, status: GattStatus) {
        if self.current_state(peer).is_none() {
            debug!("Ignoring {} event from {}, not the current peer", state, peer);
            return;
        }
        let target = OperationTarget::from(*peer);

        match state {
            ConnectionState::Connected => {
                self.update_state(*peer, ConnectionState::Connected);
                self.resolve_if_in_flight(&target, OperationKind::Connect, status);

                let Some(inner) = self.this.upgrade() else {
                    return;
                };
                let queued = self.worker.post(async move {
                    if let Err(error) = inner.discover_services().await {
                        inner.report_failure(error);
                    }
                });
                if queued.is_err() {
                    debug!("Worker closed, skipping service discovery");
                }
            }
            ConnectionState::Disconnected => {
                self.update_state(*peer, ConnectionState::Disconnected);
                let error = match self.coordinator.snapshot(&target).current_operation {
                    Some(op) if !status.is_success() => GattError::OperationFailed {
                        op,
                        target,
                        status,
                    },
                    _ => GattError::NotConnected,
                };
                self.coordinator.fail_in_flight(&target, error);
                self.link.lock().services.clear();
                self.receivers.lock().clear();
            }
            other => self.update_state(*peer, other),
        }
    }

    fn on_services_discovered(&self, peer: &PeerAddress, services: Vec<GattService>) {
        let mut link = self.link.lock();
        if link.peer == Some(*peer) {
            link.services = services;
        }
    }

    fn on_characteristic_changed(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) {
        if self.config.log.data_log {
            trace!(
                "Received {} on {} from {}",
                hex::encode(value),
                characteristic.characteristic,
                peer
            );
        }
        if self.current_state(peer).is_none() {
            warn!("Dropping data from unexpected device {}", peer);
            return;
        }

        self.read_values.lock().insert(*characteristic, value.to_vec());

        let payload_size = self.coordinator.payload_size(&OperationTarget::from(*peer));
        let mut messages = Vec::new();
        let result = {
            let mut receivers = self.receivers.lock();
            let codec = match receivers.entry(*characteristic) {
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
            warn!(
                "Malformed packet from {} on {}: {}",
                peer, characteristic.characteristic, error
            );
        }

        for message in messages {
            let peer = *peer;
            let characteristic = *characteristic;
            self.dispatch(move |callback| callback.on_message(&peer, &characteristic, &message));
        }
    }

    fn on_operation_result(
        &self,
        peer: &PeerAddress,
        op: OperationKind,
        status: GattStatus,
        uuid: Option<Uuid>,
    ) {
        self.coordinator.resolve(&OperationTarget::from(*peer), op, status, uuid);
    }

    fn on_mtu_changed(&self, peer: &PeerAddress, mtu: usize) {
        self.coordinator.on_mtu_changed(&OperationTarget::from(*peer), mtu);
    }
}
