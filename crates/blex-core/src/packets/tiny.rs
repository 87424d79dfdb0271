//! Length-framed packet protocol.
//!
//! Wire format:
//! - Header chunk: `0xA1`, total message length as an unsigned LEB128
//!   varint (at most 5 bytes), then the first message bytes
//! - Continuation chunk: `0xA2`, then further message bytes
//!
//! A message is complete once the declared number of bytes has arrived. An
//! empty message is a lone header chunk with length zero.

use tracing::warn;

use super::{check_packet_size, PacketWorker};
use crate::errors::PacketError;

pub const MARKER_HEADER: u8 = 0xA1;
pub const MARKER_CONTINUATION: u8 = 0xA2;

const MAX_VARINT_LEN: usize = 5;

/// Marker plus the longest length prefix.
pub(crate) const MIN_PACKET_SIZE: usize = 1 + MAX_VARINT_LEN;

/// Largest message the length prefix can describe.
pub const MAX_MESSAGE_LEN: usize = u32::MAX as usize;

#[derive(Debug, Clone)]
struct PendingMessage {
    declared: usize,
    buffer: Vec<u8>,
}

impl PendingMessage {
    fn remaining(&self) -> usize {
        self.declared - self.buffer.len()
    }
}

/// Framed segmentation with reassembly across chunks.
///
/// When a header arrives while a message is still incomplete, the partial
/// message is dropped, the new header opens a fresh message, and
/// [`PacketError::UnexpectedHeader`] is returned so the caller can count the
/// loss. The stream is therefore resynchronized on the next header.
#[derive(Debug, Clone)]
pub struct TinyPacketWorker {
    max_packet_size: usize,
    pending: Option<PendingMessage>,
}

impl TinyPacketWorker {
    pub fn new(max_packet_size: usize) -> Result<Self, PacketError> {
        check_packet_size(max_packet_size, MIN_PACKET_SIZE)?;
        Ok(Self {
            max_packet_size,
            pending: None,
        })
    }

    /// Whether a message is partially received.
    pub fn is_receiving(&self) -> bool {
        self.pending.is_some()
    }

    fn start_message(
        &mut self,
        body: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError> {
        let (declared, prefix_len) = decode_varint(body)?;
        let first = &body[prefix_len..];
        if first.len() > declared {
            return Err(PacketError::LengthOverflow {
                declared,
                excess: first.len() - declared,
            });
        }

        let mut buffer = Vec::with_capacity(declared.min(u16::MAX as usize));
        buffer.extend_from_slice(first);
        self.pending = Some(PendingMessage { declared, buffer });
        self.complete_if_ready(on_message);
        Ok(())
    }

    fn continue_message(
        &mut self,
        body: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or(PacketError::UnexpectedContinuation)?;

        let remaining = pending.remaining();
        if body.len() > remaining {
            let declared = pending.declared;
            self.pending = None;
            return Err(PacketError::LengthOverflow {
                declared,
                excess: body.len() - remaining,
            });
        }

        pending.buffer.extend_from_slice(body);
        self.complete_if_ready(on_message);
        Ok(())
    }

    fn complete_if_ready(&mut self, on_message: &mut dyn FnMut(Vec<u8>)) {
        if matches!(&self.pending, Some(p) if p.remaining() == 0) {
            if let Some(message) = self.pending.take() {
                on_message(message.buffer);
            }
        }
    }
}

impl PacketWorker for TinyPacketWorker {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn set_max_packet_size(&mut self, size: usize) -> Result<(), PacketError> {
        check_packet_size(size, MIN_PACKET_SIZE)?;
        self.max_packet_size = size;
        Ok(())
    }

    fn segment(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        if data.len() > MAX_MESSAGE_LEN {
            return Err(PacketError::MessageTooLarge {
                size: data.len(),
                max_size: MAX_MESSAGE_LEN,
            });
        }

        let mut header = vec![MARKER_HEADER];
        encode_varint(data.len(), &mut header);
        let first_len = data.len().min(self.max_packet_size - header.len());
        header.extend_from_slice(&data[..first_len]);

        let mut chunks = vec![header];
        for body in data[first_len..].chunks(self.max_packet_size - 1) {
            let mut chunk = Vec::with_capacity(body.len() + 1);
            chunk.push(MARKER_CONTINUATION);
            chunk.extend_from_slice(body);
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    fn feed(
        &mut self,
        chunk: &[u8],
        on_message: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), PacketError> {
        let Some((&marker, body)) = chunk.split_first() else {
            return Ok(());
        };

        match marker {
            MARKER_HEADER => {
                let dropped = self.pending.take();
                self.start_message(body, on_message)?;
                match dropped {
                    Some(partial) => {
                        warn!(
                            "Dropping partial message: {} of {} bytes received",
                            partial.buffer.len(),
                            partial.declared
                        );
                        Err(PacketError::UnexpectedHeader {
                            remaining: partial.remaining(),
                        })
                    }
                    None => Ok(()),
                }
            }
            MARKER_CONTINUATION => self.continue_message(body, on_message),
            other => Err(PacketError::UnknownMarker(other)),
        }
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

// ----------------------------------------------------------------------------
// Varint Helpers
// ----------------------------------------------------------------------------

fn encode_varint(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn decode_varint(bytes: &[u8]) -> Result<(usize, usize), PacketError> {
    let mut value: u64 = 0;
    for (index, &byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * index);
        if byte & 0x80 == 0 {
            if value > MAX_MESSAGE_LEN as u64 {
                return Err(PacketError::MalformedHeader);
            }
            return Ok((value as usize, index + 1));
        }
    }
    Err(PacketError::MalformedHeader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(worker: &mut TinyPacketWorker, chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut received = Vec::new();
        for chunk in chunks {
            worker.feed(chunk, &mut |m| received.push(m)).unwrap();
        }
        received
    }

    #[test]
    fn test_varint_lengths() {
        for (value, len) in [(0usize, 1usize), (127, 1), (128, 2), (16_383, 2), (16_384, 3)] {
            let mut out = Vec::new();
            encode_varint(value, &mut out);
            assert_eq!(out.len(), len);
            assert_eq!(decode_varint(&out).unwrap(), (value, len));
        }
        assert_eq!(decode_varint(&[0x80, 0x80]), Err(PacketError::MalformedHeader));
    }

    #[test]
    fn test_segment_layout() {
        let worker = TinyPacketWorker::new(8).unwrap();
        let chunks = worker.segment(b"hello world").unwrap();

        assert_eq!(chunks[0], [&[MARKER_HEADER, 11][..], &b"hello "[..]].concat());
        assert!(chunks.iter().all(|c| c.len() <= 8));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], [&[MARKER_CONTINUATION][..], &b"world"[..]].concat());
    }

    #[test]
    fn test_clean_stream_reassembles_in_order() {
        let sender = TinyPacketWorker::new(20).unwrap();
        let mut receiver = TinyPacketWorker::new(20).unwrap();

        let first = vec![7u8; 50];
        let second = b"short".to_vec();
        let mut chunks = sender.segment(&first).unwrap();
        chunks.extend(sender.segment(&second).unwrap());

        let received = feed_all(&mut receiver, &chunks);
        assert_eq!(received, vec![first, second]);
        assert!(!receiver.is_receiving());
    }

    #[test]
    fn test_empty_message() {
        let worker = TinyPacketWorker::new(20).unwrap();
        let chunks = worker.segment(&[]).unwrap();
        assert_eq!(chunks, vec![vec![MARKER_HEADER, 0]]);

        let mut receiver = TinyPacketWorker::new(20).unwrap();
        assert_eq!(feed_all(&mut receiver, &chunks), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_continuation_without_header() {
        let mut worker = TinyPacketWorker::new(20).unwrap();
        let result = worker.feed(&[MARKER_CONTINUATION, 1, 2], &mut |_| panic!("no message expected"));
        assert_eq!(result, Err(PacketError::UnexpectedContinuation));
    }

    #[test]
    fn test_truncated_message_resynchronizes_on_next_header() {
        let sender = TinyPacketWorker::new(10).unwrap();
        let mut receiver = TinyPacketWorker::new(10).unwrap();

        let lost = sender.segment(&[1u8; 30]).unwrap();
        let next = sender.segment(b"ok").unwrap();
        assert_eq!(next.len(), 1);

        let mut received = Vec::new();
        receiver.feed(&lost[0], &mut |m| received.push(m)).unwrap();
        assert!(receiver.is_receiving());

        let result = receiver.feed(&next[0], &mut |m| received.push(m));
        assert_eq!(result, Err(PacketError::UnexpectedHeader { remaining: 22 }));
        assert_eq!(received, vec![b"ok".to_vec()]);
        assert!(!receiver.is_receiving());
    }

    #[test]
    fn test_out_of_order_chunks() {
        let sender = TinyPacketWorker::new(10).unwrap();
        let mut receiver = TinyPacketWorker::new(10).unwrap();
        let chunks = sender.segment(&[9u8; 25]).unwrap();
        assert_eq!(chunks.len(), 3);

        let mut received = Vec::new();
        assert_eq!(
            receiver.feed(&chunks[1], &mut |m| received.push(m)),
            Err(PacketError::UnexpectedContinuation)
        );
        receiver.feed(&chunks[0], &mut |m| received.push(m)).unwrap();
        receiver.feed(&chunks[2], &mut |m| received.push(m)).unwrap();
        assert!(received.is_empty());
        assert!(receiver.is_receiving());
    }

    #[test]
    fn test_length_overflow() {
        let mut worker = TinyPacketWorker::new(20).unwrap();
        let result = worker.feed(&[MARKER_HEADER, 2, 1, 2, 3], &mut |_| {});
        assert_eq!(
            result,
            Err(PacketError::LengthOverflow {
                declared: 2,
                excess: 1
            })
        );

        worker.feed(&[MARKER_HEADER, 3, 1], &mut |_| {}).unwrap();
        let result = worker.feed(&[MARKER_CONTINUATION, 2, 3, 4], &mut |_| {});
        assert_eq!(
            result,
            Err(PacketError::LengthOverflow {
                declared: 3,
                excess: 1
            })
        );
        assert!(!worker.is_receiving());
    }

    #[test]
    fn test_unknown_marker() {
        let mut worker = TinyPacketWorker::new(20).unwrap();
        assert_eq!(
            worker.feed(&[0x42, 1], &mut |_| {}),
            Err(PacketError::UnknownMarker(0x42))
        );
    }

    #[test]
    fn test_packet_size_change_affects_next_segment() {
        let mut worker = TinyPacketWorker::new(20).unwrap();
        let before = worker.segment(&[0u8; 100]).unwrap();
        worker.set_max_packet_size(100).unwrap();
        let after = worker.segment(&[0u8; 100]).unwrap();
        assert!(before.len() > after.len());
        assert!(before.iter().all(|c| c.len() <= 20));
        assert_eq!(
            worker.set_max_packet_size(5),
            Err(PacketError::PacketSizeTooSmall {
                size: 5,
                min_size: 6
            })
        );
    }
}
