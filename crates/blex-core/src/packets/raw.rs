use super::{check_packet_size, PacketWorker};
use crate::errors::PacketError;

pub(crate) const MIN_PACKET_SIZE: usize = 1;

/// Pass-through framing: one chunk is one message.
#[derive(Debug, Clone)]
pub struct RawPacketWorker {
    max_packet_size: usize,
}

impl RawPacketWorker {
    pub fn new(max_packet_size: usize) -> Result<Self, PacketError> {
        check_packet_size(max_packet_size, MIN_PACKET_SIZE)?;
        Ok(Self { max_packet_size })
    }
}

impl PacketWorker for RawPacketWorker {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn set_max_packet_size(&mut self, size: usize) -> Result<(), PacketError> {
        check_packet_size(size, MIN_PACKET_SIZE)?;
        self.max_packet_size = size;
        Ok(())
    }

    fn segment(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        Ok(data
            .chunks(self.max_packet_size)
            .map(<[u8]>::to_vec)
            .collect())
    }

    fn feed(
        &mut self,
        chunk: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError> {
        if !chunk.is_empty() {
            on_message(chunk.to_vec());
        }
        Ok(())
    }

    fn reset(&mut self) {}
}
