//! Property-based tests for packet segmentation and reassembly

use blex_core::packets::tiny::MARKER_CONTINUATION;
use blex_core::{CodecKind, PacketCodec, PacketWorker};
use proptest::prelude::*;

fn reassemble(codec: &mut PacketCodec, chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut received = Vec::new();
    for chunk in chunks {
        codec
            .feed(chunk, &mut |message| received.push(message))
            .expect("in-order chunks should reassemble");
    }
    received
}

proptest! {
    /// Property: every chunk respects the packet size
    #[test]
    fn chunks_never_exceed_packet_size(
        data in prop::collection::vec(any::<u8>(), 0..600),
        packet_size in 6usize..64,
    ) {
        for kind in [CodecKind::Raw, CodecKind::Tiny] {
            let codec = PacketCodec::new(kind, packet_size).unwrap();
            let chunks = codec.segment(&data).unwrap();
            prop_assert!(chunks.iter().all(|chunk| chunk.len() <= packet_size));
        }
    }

    /// Property: a tiny-framed stream of messages comes back unchanged
    #[test]
    fn tiny_stream_reassembles(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..5),
        packet_size in 6usize..64,
    ) {
        let sender = PacketCodec::new(CodecKind::Tiny, packet_size).unwrap();
        let mut receiver = PacketCodec::new(CodecKind::Tiny, packet_size).unwrap();

        let mut chunks = Vec::new();
        for message in &messages {
            chunks.extend(sender.segment(message).unwrap());
        }

        prop_assert_eq!(reassemble(&mut receiver, &chunks), messages);
    }

    /// Property: raw chunks concatenate back to the input
    #[test]
    fn raw_chunks_concatenate(
        data in prop::collection::vec(any::<u8>(), 1..600),
        packet_size in 1usize..64,
    ) {
        let sender = PacketCodec::new(CodecKind::Raw, packet_size).unwrap();
        let mut receiver = PacketCodec::new(CodecKind::Raw, packet_size).unwrap();

        let chunks = sender.segment(&data).unwrap();
        prop_assert_eq!(reassemble(&mut receiver, &chunks).concat(), data);
    }

    /// Property: continuation chunks on an idle receiver never yield a message
    #[test]
    fn stray_continuations_are_rejected(body in prop::collection::vec(any::<u8>(), 0..32)) {
        let mut receiver = PacketCodec::new(CodecKind::Tiny, 20).unwrap();
        let mut chunk = vec![MARKER_CONTINUATION];
        chunk.extend(body);

        let mut received = Vec::new();
        prop_assert!(receiver.feed(&chunk, &mut |m| received.push(m)).is_err());
        prop_assert!(received.is_empty());
    }
}
