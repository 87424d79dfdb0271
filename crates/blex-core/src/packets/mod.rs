//! MTU-aware message segmentation and reassembly
//!
//! A GATT characteristic write or notification carries at most one ATT
//! payload, so application messages are split into chunks no larger than the
//! negotiated packet size and rebuilt on the receiving side.
//!
//! Two framings are provided:
//! - [`RawPacketWorker`]: chunks are passed through unchanged, every received
//!   chunk is a message
//! - [`TinyPacketWorker`]: a marker byte and a varint length let the receiver
//!   rebuild messages that span several chunks

use serde::{Deserialize, Serialize};

use crate::errors::PacketError;

mod raw;
pub mod tiny;

pub use raw::RawPacketWorker;
pub use tiny::TinyPacketWorker;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// ATT payload of the default 23-byte ATT MTU.
pub const DEFAULT_PACKET_SIZE: usize = 20;

// ----------------------------------------------------------------------------
// Packet Worker Trait
// ----------------------------------------------------------------------------

/// Segmentation and reassembly strategy for one stream of chunks.
pub trait PacketWorker {
    fn max_packet_size(&self) -> usize;

    /// Change the chunk size used by subsequent `segment` calls.
    fn set_max_packet_size(&mut self, size: usize) -> Result<(), PacketError>;

    /// Split `data` into chunks of at most `max_packet_size` bytes.
    fn segment(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, PacketError>;

    /// Consume one received chunk. Every message completed by this chunk is
    /// handed to `on_message`, even when an error is also returned.
    fn feed(
        &mut self,
        chunk: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError>;

    /// Drop any partially received message.
    fn reset(&mut self);
}

// ----------------------------------------------------------------------------
// Codec Selection
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Raw,
    Tiny,
}

impl CodecKind {
    pub fn min_packet_size(&self) -> usize {
        match self {
            CodecKind::Raw => raw::MIN_PACKET_SIZE,
            CodecKind::Tiny => tiny::MIN_PACKET_SIZE,
        }
    }
}

/// A packet worker selected at runtime.
#[derive(Debug, Clone)]
pub enum PacketCodec {
    Raw(RawPacketWorker),
    Tiny(TinyPacketWorker),
}

impl PacketCodec {
    pub fn new(kind: CodecKind, max_packet_size: usize) -> Result<Self, PacketError> {
        Ok(match kind {
            CodecKind::Raw => PacketCodec::Raw(RawPacketWorker::new(max_packet_size)?),
            CodecKind::Tiny => PacketCodec::Tiny(TinyPacketWorker::new(max_packet_size)?),
        })
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            PacketCodec::Raw(_) => CodecKind::Raw,
            PacketCodec::Tiny(_) => CodecKind::Tiny,
        }
    }

    fn worker(&self) -> &dyn PacketWorker {
        match self {
            PacketCodec::Raw(worker) => worker,
            PacketCodec::Tiny(worker) => worker,
        }
    }

    fn worker_mut(&mut self) -> &mut dyn PacketWorker {
        match self {
            PacketCodec::Raw(worker) => worker,
            PacketCodec::Tiny(worker) => worker,
        }
    }
}

impl PacketWorker for PacketCodec {
    fn max_packet_size(&self) -> usize {
        self.worker().max_packet_size()
    }

    fn set_max_packet_size(&mut self, size: usize) -> Result<(), PacketError> {
        self.worker_mut().set_max_packet_size(size)
    }

    fn segment(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        self.worker().segment(data)
    }

    fn feed(
        &mut self,
        chunk: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError> {
        self.worker_mut().feed(chunk, on_message)
    }

    fn reset(&mut self) {
        self.worker_mut().reset()
    }
}

pub(crate) fn check_packet_size(size: usize, min_size: usize) -> Result<(), PacketError> {
    if size < min_size {
        return Err(PacketError::PacketSizeTooSmall { size, min_size });
    }
    Ok(())
}
