//! Error types for the blex toolkit
//!
//! Each layer has its own error enum; `BlexError` unifies them for callers
//! that cross layers (the CLI, integration code).

use uuid::Uuid;

use crate::types::{GattStatus, OperationKind, OperationTarget};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Advertisement codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdvertisementError {
    #[error("Malformed AD record 0x{record_type:02x}: {reason}")]
    MalformedRecord { record_type: u8, reason: String },
    #[error("AD record 0x{record_type:02x} too long: {size} bytes")]
    RecordTooLong { record_type: u8, size: usize },
    #[error("Advertisement payload too large: {size} bytes (max: {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },
}

/// Packet segmentation and reassembly errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Unexpected header while {remaining} bytes of the previous message were pending")]
    UnexpectedHeader { remaining: usize },
    #[error("Continuation chunk without an open message")]
    UnexpectedContinuation,
    #[error("Unknown chunk marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("Malformed chunk header")]
    MalformedHeader,
    #[error("Chunk overflows declared message length {declared} by {excess} bytes")]
    LengthOverflow { declared: usize, excess: usize },
    #[error("Packet size {size} below minimum {min_size}")]
    PacketSizeTooSmall { size: usize, min_size: usize },
    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },
}

/// GATT operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GattError {
    #[error("Not connected")]
    NotConnected,
    #[error("GATT server not started")]
    ServerNotStarted,
    #[error("Not paired yet: {target} requires encryption")]
    InsufficientEncryption { target: OperationTarget },
    #[error("Operation [{op}] on device [{target}] failed: {status}")]
    OperationFailed {
        op: OperationKind,
        target: OperationTarget,
        status: GattStatus,
    },
    #[error("Operation[{op}] for {target}/{characteristic:?} timeout after {timeout_ms}ms")]
    OperationTimeout {
        op: OperationKind,
        target: OperationTarget,
        characteristic: Option<Uuid>,
        timeout_ms: u64,
    },
    #[error("Prepared write buffer overflow: {requested} bytes requested (limit: {limit})")]
    BufferOverflow { requested: usize, limit: usize },
    #[error("Service not found: {service}")]
    ServiceNotFound { service: Uuid },
    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: Uuid },
    #[error("Transport rejected operation [{op}]: {reason}")]
    TransportRejected { op: OperationKind, reason: String },
    #[error("Read of {characteristic} completed without a value")]
    EmptyReadResponse { characteristic: Uuid },
    #[error("Operation executor closed")]
    ExecutorClosed,
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Advertisement error: {0}")]
    Advertisement(#[from] AdvertisementError),
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Top-level error type for the blex toolkit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlexError {
    #[error("Advertisement error: {0}")]
    Advertisement(#[from] AdvertisementError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("GATT error: {0}")]
    Gatt(#[from] GattError),

    #[error("Invalid device address: {address}")]
    InvalidAddress { address: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type GattResult<T> = core::result::Result<T, GattError>;
