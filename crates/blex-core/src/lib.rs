//! blex Core
//!
//! Transport-agnostic building blocks for the blex BLE toolkit:
//!
//! - **Advertisement codec**: decodes and builds legacy advertising payloads
//!   made of length/type/value records
//! - **Packet codecs**: split application messages into MTU-sized chunks and
//!   reassemble them on the receiving side (raw and tiny length-framed)
//! - **Shared types**: peer addresses, GATT status codes, operation kinds and
//!   service definitions used by the GATT layer

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod advertisement;
pub mod errors;
pub mod packets;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use advertisement::{
    company_name, decode_advertisement, AdvertisementBuilder, AdvertisementPayload,
};
pub use errors::{AdvertisementError, BlexError, GattError, GattResult, PacketError};
pub use packets::{CodecKind, PacketCodec, PacketWorker, RawPacketWorker, TinyPacketWorker};
pub use types::{
    sig_uuid, CharacteristicProperties, CharacteristicRef, ConnectionState, GattCharacteristic,
    GattService, GattStatus, OperationKind, OperationTarget, PeerAddress,
};

pub type Result<T> = core::result::Result<T, BlexError>;

/// Alias used where `Result` would shadow the prelude.
pub type BlexResult<T> = Result<T>;
