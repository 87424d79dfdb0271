//! Shared fixtures for the gatt integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use blex_gatt::{
    CentralCallback, CharacteristicRef, ConnectionState, GattError, GattEventSink, GattResult,
    GattService, GattStatus, GattTransport, OperationKind, PeerAddress, PeripheralHandler,
    PeripheralSession,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ----------------------------------------------------------------------------
// Recording Observers
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    State(ConnectionState),
    Discovered(usize),
    Message(CharacteristicRef, Vec<u8>),
    Failed(GattError),
}

pub struct RecordingCallback {
    events: mpsc::UnboundedSender<CentralEvent>,
}

impl RecordingCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CentralEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

impl CentralCallback for RecordingCallback {
    fn on_state_changed(&self, _peer: &PeerAddress, state: ConnectionState) {
        let _ = self.events.send(CentralEvent::State(state));
    }

    fn on_services_discovered(&self, _peer: &PeerAddress, services: &[GattService]) {
        let _ = self.events.send(CentralEvent::Discovered(services.len()));
    }

    fn on_message(&self, _peer: &PeerAddress, characteristic: &CharacteristicRef, data: &[u8]) {
        let _ = self
            .events
            .send(CentralEvent::Message(*characteristic, data.to_vec()));
    }

    fn on_operation_failed(&self, error: &GattError) {
        let _ = self.events.send(CentralEvent::Failed(error.clone()));
    }
}

/// Wait for the next message, skipping other events.
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<CentralEvent>) -> Vec<u8> {
    loop {
        if let CentralEvent::Message(_, data) = recv(rx).await {
            return data;
        }
    }
}

pub struct RecordingHandler {
    messages: mpsc::UnboundedSender<(PeerAddress, CharacteristicRef, Vec<u8>)>,
}

impl RecordingHandler {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(PeerAddress, CharacteristicRef, Vec<u8>)>,
    ) {
        let (messages, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { messages }), rx)
    }
}

impl PeripheralHandler for RecordingHandler {
    fn on_read_request(
        &self,
        _peer: &PeerAddress,
        _characteristic: &CharacteristicRef,
    ) -> Option<Vec<u8>> {
        Some(b"0123456789".to_vec())
    }

    fn on_message(
        &self,
        _session: &PeripheralSession,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        data: &[u8],
    ) {
        let _ = self.messages.send((*peer, *characteristic, data.to_vec()));
    }
}

// ----------------------------------------------------------------------------
// Scripted Transport
// ----------------------------------------------------------------------------

/// Client transport that answers from a script instead of a radio.
///
/// Connect, discovery, MTU and subscribe always succeed. Writes take their
/// status from `write_statuses` (success once exhausted). Reads either
/// return `read_value` or never complete when `hang_reads` is set.
pub struct MockTransport {
    pub peer: PeerAddress,
    pub services: Vec<GattService>,
    pub read_value: Vec<u8>,
    pub hang_reads: bool,
    write_statuses: Mutex<VecDeque<GattStatus>>,
    calls: Mutex<Vec<String>>,
    sink: Mutex<Option<Weak<dyn GattEventSink>>>,
}

impl MockTransport {
    pub fn new(peer: PeerAddress, services: Vec<GattService>) -> Self {
        Self {
            peer,
            services,
            read_value: vec![0x2A],
            hang_reads: false,
            write_statuses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    pub fn with_hanging_reads(mut self) -> Self {
        self.hang_reads = true;
        self
    }

    pub fn script_writes(&self, statuses: impl IntoIterator<Item = GattStatus>) {
        self.write_statuses.lock().extend(statuses);
    }

    pub fn bind(&self, sink: Arc<dyn GattEventSink>) {
        *self.sink.lock() = Some(Arc::downgrade(&sink));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn later<F>(&self, event: F)
    where
        F: FnOnce(&dyn GattEventSink) + Send + 'static,
    {
        let sink = self.sink.lock().clone();
        tokio::spawn(async move {
            if let Some(sink) = sink.and_then(|sink| sink.upgrade()) {
                event(sink.as_ref());
            }
        });
    }

    fn complete(&self, op: OperationKind, status: GattStatus, uuid: Option<uuid::Uuid>) {
        let peer = self.peer;
        self.later(move |sink| sink.on_operation_result(&peer, op, status, uuid));
    }
}

impl GattTransport for MockTransport {
    fn connect(&self, peer: &PeerAddress) -> GattResult<()> {
        self.record(format!("connect {}", peer));
        let peer = *peer;
        self.later(move |sink| {
            sink.on_connection_state(&peer, ConnectionState::Connected, GattStatus::SUCCESS)
        });
        Ok(())
    }

    fn disconnect(&self, peer: &PeerAddress) -> GattResult<()> {
        self.record(format!("disconnect {}", peer));
        Ok(())
    }

    fn discover_services(&self, peer: &PeerAddress) -> GattResult<()> {
        self.record("discover".to_string());
        let peer = *peer;
        let services = self.services.clone();
        self.later(move |sink| {
            sink.on_services_discovered(&peer, services);
            sink.on_operation_result(
                &peer,
                OperationKind::DiscoverServices,
                GattStatus::SUCCESS,
                None,
            );
        });
        Ok(())
    }

    fn read_characteristic(
        &self,
        _peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> GattResult<()> {
        self.record(format!("read {}", characteristic.characteristic));
        if self.hang_reads {
            return Ok(());
        }
        let peer = self.peer;
        let characteristic = *characteristic;
        let value = self.read_value.clone();
        self.later(move |sink| {
            sink.on_characteristic_changed(&peer, &characteristic, &value);
            sink.on_operation_result(
                &peer,
                OperationKind::ReadCharacteristic,
                GattStatus::SUCCESS,
                Some(characteristic.characteristic),
            );
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        _peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> GattResult<()> {
        self.record(format!("write {}", hex::encode(value)));
        let status = self
            .write_statuses
            .lock()
            .pop_front()
            .unwrap_or(GattStatus::SUCCESS);
        self.complete(
            OperationKind::WriteCharacteristic,
            status,
            Some(characteristic.characteristic),
        );
        Ok(())
    }

    fn configure_mtu(&self, _peer: &PeerAddress, mtu: usize) -> GattResult<()> {
        self.record(format!("mtu {}", mtu));
        let peer = self.peer;
        self.later(move |sink| {
            sink.on_mtu_changed(&peer, mtu);
            sink.on_operation_result(&peer, OperationKind::ConfigureMtu, GattStatus::SUCCESS, None);
        });
        Ok(())
    }

    fn subscribe(&self, _peer: &PeerAddress, characteristic: &CharacteristicRef) -> GattResult<()> {
        self.record(format!("subscribe {}", characteristic.characteristic));
        self.complete(
            OperationKind::WriteDescriptor,
            GattStatus::SUCCESS,
            Some(characteristic.characteristic),
        );
        Ok(())
    }
}
