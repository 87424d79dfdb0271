//! Shared BLE types
//!
//! Identifiers and value types exchanged between the codecs, the GATT
//! coordinator and the sessions.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::BlexError;

// ----------------------------------------------------------------------------
// UUID Helpers
// ----------------------------------------------------------------------------

/// Bluetooth SIG base UUID `00000000-0000-1000-8000-00805f9b34fb`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit SIG assigned number into a full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Client Characteristic Configuration Descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = sig_uuid(0x2902);

/// Recover the 16-bit assigned number when `uuid` sits on the SIG base.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// 48-bit Bluetooth device address, formatted as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for PeerAddress {
    type Err = BlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BlexError::InvalidAddress {
            address: s.to_string(),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = BlexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(value: PeerAddress) -> Self {
        value.to_string()
    }
}

/// Key of a per-peer operation workspace.
///
/// Local adapter operations (service registration) are not tied to a remote
/// device and share the `Adapter` workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTarget {
    Adapter,
    Peer(PeerAddress),
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationTarget::Adapter => write!(f, "local-adapter"),
            OperationTarget::Peer(address) => write!(f, "{}", address),
        }
    }
}

impl From<PeerAddress> for OperationTarget {
    fn from(address: PeerAddress) -> Self {
        OperationTarget::Peer(address)
    }
}

// ----------------------------------------------------------------------------
// GATT Status
// ----------------------------------------------------------------------------

/// Status code reported by the BLE stack for a completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INVALID_PDU: Self = Self(0x04);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    pub const INVALID_OFFSET: Self = Self(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: Self = Self(0x08);
    pub const PREPARE_QUEUE_FULL: Self = Self(0x09);
    pub const INVALID_ATTRIBUTE_LENGTH: Self = Self(0x0D);
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x0F);
    pub const NO_RESOURCES: Self = Self(0x80);
    pub const BUSY: Self = Self(0x84);
    pub const ERROR: Self = Self(0x85);
    pub const CONNECTION_CONGESTED: Self = Self(0x8F);
    pub const FAILURE: Self = Self(0x101);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Symbolic name for well-known codes.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::SUCCESS => "GATT_SUCCESS",
            Self::INVALID_HANDLE => "GATT_INVALID_HANDLE",
            Self::READ_NOT_PERMITTED => "GATT_READ_NOT_PERMITTED",
            Self::WRITE_NOT_PERMITTED => "GATT_WRITE_NOT_PERMITTED",
            Self::INVALID_PDU => "GATT_INVALID_PDU",
            Self::INSUFFICIENT_AUTHENTICATION => "GATT_INSUFFICIENT_AUTHENTICATION",
            Self::REQUEST_NOT_SUPPORTED => "GATT_REQUEST_NOT_SUPPORTED",
            Self::INVALID_OFFSET => "GATT_INVALID_OFFSET",
            Self::INSUFFICIENT_AUTHORIZATION => "GATT_INSUF_AUTHORIZATION",
            Self::PREPARE_QUEUE_FULL => "GATT_PREPARE_QUEUE_FULL",
            Self::INVALID_ATTRIBUTE_LENGTH => "GATT_INVALID_ATTRIBUTE_LENGTH",
            Self::INSUFFICIENT_ENCRYPTION => "GATT_INSUFFICIENT_ENCRYPTION",
            Self::NO_RESOURCES => "GATT_NO_RESOURCES",
            Self::BUSY => "GATT_BUSY",
            Self::ERROR => "GATT_ERROR",
            Self::CONNECTION_CONGESTED => "GATT_CONNECTION_CONGESTED",
            Self::FAILURE => "GATT_FAILURE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}-[0x{:02x}]", name, self.0),
            None => write!(f, "GATT_STATUS_UNKNOWN-[0x{:02x}]", self.0),
        }
    }
}

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Link state of a central session or a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

/// Kind of a GATT operation tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Connect,
    Disconnect,
    DiscoverServices,
    ConfigureMtu,
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
    AddService,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Connect => "CONNECT",
            OperationKind::Disconnect => "DISCONNECT",
            OperationKind::DiscoverServices => "DISCOVER_SERVICES",
            OperationKind::ConfigureMtu => "CONFIGURE_MTU",
            OperationKind::ReadCharacteristic => "READ_CHARACTERISTIC",
            OperationKind::WriteCharacteristic => "WRITE_CHARACTERISTIC",
            OperationKind::ReadDescriptor => "READ_DESCRIPTOR",
            OperationKind::WriteDescriptor => "WRITE_DESCRIPTOR",
            OperationKind::AddService => "ADD_SERVICE",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Service Definitions
// ----------------------------------------------------------------------------

/// Characteristic property bit set, using the ATT property bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(pub u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Fully qualified characteristic: services may appear more than once on a
/// server, so the service instance is part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub service_instance: u16,
    pub characteristic: Uuid,
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}/{}",
            self.service, self.service_instance, self.characteristic
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Uuid) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn has_descriptor(&self, descriptor: &Uuid) -> bool {
        self.descriptors.contains(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub instance_id: u16,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, instance_id: u16) -> Self {
        Self {
            uuid,
            instance_id,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Reference to one of this service's characteristics.
    pub fn characteristic_ref(&self, uuid: &Uuid) -> Option<CharacteristicRef> {
        self.characteristic(uuid).map(|c| CharacteristicRef {
            service: self.uuid,
            service_instance: self.instance_id,
            characteristic: c.uuid,
        })
    }
}
