//! Transport abstraction
//!
//! The radio side of the toolkit. A transport starts operations and reports
//! their outcome later through an event sink; it never blocks waiting for the
//! remote device. Platform backends and the in-process [`LoopbackLink`]
//! implement these traits.
//!
//! [`LoopbackLink`]: crate::loopback::LoopbackLink

use uuid::Uuid;

use blex_core::{
    CharacteristicRef, ConnectionState, GattResult, GattService, GattStatus, OperationKind,
    PeerAddress,
};

use crate::advertising::AdvertiseSettings;

// ----------------------------------------------------------------------------
// Client Side
// ----------------------------------------------------------------------------

/// Operations a central can start on a remote GATT server.
///
/// Each method only initiates the operation. Completion is reported through
/// [`GattEventSink::on_operation_result`] (or the connection state callback
/// for connect and disconnect).
pub trait GattTransport: Send + Sync {
    fn connect(&self, peer: &PeerAddress) -> GattResult<()>;
    fn disconnect(&self, peer: &PeerAddress) -> GattResult<()>;
    fn discover_services(&self, peer: &PeerAddress) -> GattResult<()>;
    fn read_characteristic(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> GattResult<()>;
    fn write_characteristic(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
    ) -> GattResult<()>;
    fn configure_mtu(&self, peer: &PeerAddress, mtu: usize) -> GattResult<()>;
    /// Enable notifications, writing the client configuration descriptor
    /// when the characteristic has one.
    fn subscribe(&self, peer: &PeerAddress, characteristic: &CharacteristicRef) -> GattResult<()>;
}

/// Events a client transport reports back.
pub trait GattEventSink: Send + Sync {
    fn on_connection_state(&self, peer: &PeerAddress, state: ConnectionState, status: GattStatus);
    fn on_services_discovered(&self, peer: &PeerAddress, services: Vec<GattService>);
    /// A notification, or the value returned by a read.
    fn on_characteristic_changed(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
    );
    fn on_operation_result(
        &self,
        peer: &PeerAddress,
        op: OperationKind,
        status: GattStatus,
        uuid: Option<Uuid>,
    );
    /// ATT MTU agreed with the peer.
    fn on_mtu_changed(&self, peer: &PeerAddress, mtu: usize);
}

// ----------------------------------------------------------------------------
// Server Side
// ----------------------------------------------------------------------------

/// Operations of a local GATT server and advertiser.
pub trait GattServerTransport: Send + Sync {
    fn open(&self) -> GattResult<()>;
    /// Register a service; completion arrives as
    /// [`GattServerEventSink::on_service_added`].
    fn add_service(&self, service: &GattService) -> GattResult<()>;
    fn start_advertising(&self, settings: &AdvertiseSettings, payload: &[u8]) -> GattResult<()>;
    fn stop_advertising(&self);
    /// Send a notification (or an indication when `confirm` is set);
    /// completion arrives as [`GattServerEventSink::on_notification_sent`].
    fn notify_characteristic_changed(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        value: &[u8],
        confirm: bool,
    ) -> GattResult<()>;
    fn close(&self);
}

/// Response to a read request from a remote client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    pub status: GattStatus,
    pub value: Vec<u8>,
}

impl GattResponse {
    pub fn success(value: Vec<u8>) -> Self {
        Self {
            status: GattStatus::SUCCESS,
            value,
        }
    }

    pub fn failure(status: GattStatus) -> Self {
        Self {
            status,
            value: Vec::new(),
        }
    }
}

/// Events a server transport reports back. Request callbacks return the
/// response the transport sends to the remote client.
pub trait GattServerEventSink: Send + Sync {
    fn on_connection_state(&self, peer: &PeerAddress, state: ConnectionState, status: GattStatus);
    fn on_service_added(&self, status: GattStatus, service: Uuid);
    fn on_characteristic_read_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        offset: usize,
    ) -> GattResponse;
    fn on_characteristic_write_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        prepared: bool,
        offset: usize,
        value: &[u8],
    ) -> GattStatus;
    fn on_descriptor_read_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
    ) -> GattResponse;
    fn on_descriptor_write_request(
        &self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> GattStatus;
    /// Commit (`execute == true`) or cancel the peer's prepared writes.
    fn on_execute_write(&self, peer: &PeerAddress, execute: bool) -> GattStatus;
    fn on_notification_sent(&self, peer: &PeerAddress, status: GattStatus);
    fn on_mtu_changed(&self, peer: &PeerAddress, mtu: usize);
}
