//! Prepared-write accumulation
//!
//! Long writes arrive as a series of prepared fragments followed by an
//! execute (commit) or cancel. Fragments are buffered per peer and
//! characteristic until then.

use std::collections::HashMap;

use blex_core::{CharacteristicRef, GattError, GattResult, PeerAddress};

#[derive(Debug)]
pub struct PendingWrites {
    initial_capacity: usize,
    limit: usize,
    buffers: HashMap<PeerAddress, HashMap<CharacteristicRef, Vec<u8>>>,
}

impl PendingWrites {
    pub fn new(initial_capacity: usize, limit: usize) -> Self {
        Self {
            initial_capacity,
            limit,
            buffers: HashMap::new(),
        }
    }

    /// Append one prepared fragment.
    ///
    /// A full buffer grows to `max(capacity + fragment, 2 * capacity)`, capped
    /// at the configured limit. Fragments that would push the buffer past the
    /// limit fail with [`GattError::BufferOverflow`] and leave it unchanged.
    pub fn append(
        &mut self,
        peer: &PeerAddress,
        characteristic: &CharacteristicRef,
        fragment: &[u8],
    ) -> GattResult<()> {
        let initial_capacity = self.initial_capacity;
        let limit = self.limit;
        let buffer = self
            .buffers
            .entry(*peer)
            .or_default()
            .entry(*characteristic)
            .or_insert_with(|| Vec::with_capacity(initial_capacity));

        let required = buffer.len() + fragment.len();
        if required > limit {
            return Err(GattError::BufferOverflow {
                requested: required,
                limit,
            });
        }

        let capacity = buffer.capacity();
        if required > capacity {
            let grown = (capacity + fragment.len()).max(capacity * 2).min(limit);
            buffer.reserve_exact(grown - buffer.len());
        }
        buffer.extend_from_slice(fragment);
        Ok(())
    }

    /// Remove and return everything buffered for `peer`.
    pub fn take(&mut self, peer: &PeerAddress) -> Vec<(CharacteristicRef, Vec<u8>)> {
        self.buffers
            .remove(peer)
            .map(|buffers| buffers.into_iter().collect())
            .unwrap_or_default()
    }

    /// Discard everything buffered for `peer`.
    pub fn cancel(&mut self, peer: &PeerAddress) {
        self.buffers.remove(peer);
    }

    pub fn buffered_len(&self, peer: &PeerAddress, characteristic: &CharacteristicRef) -> usize {
        self.buffers
            .get(peer)
            .and_then(|buffers| buffers.get(characteristic))
            .map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blex_core::sig_uuid;

    fn peer() -> PeerAddress {
        PeerAddress::new([1, 2, 3, 4, 5, 6])
    }

    fn characteristic() -> CharacteristicRef {
        CharacteristicRef {
            service: sig_uuid(0x180F),
            service_instance: 0,
            characteristic: sig_uuid(0x2A19),
        }
    }

    #[test]
    fn test_fragments_grow_past_initial_capacity() {
        let mut writes = PendingWrites::new(16, 1024);
        let fragments: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 7]).collect();
        for fragment in &fragments {
            writes.append(&peer(), &characteristic(), fragment).unwrap();
        }
        assert_eq!(writes.buffered_len(&peer(), &characteristic()), 70);

        let taken = writes.take(&peer());
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].1, fragments.concat());
        assert_eq!(writes.buffered_len(&peer(), &characteristic()), 0);
    }

    #[test]
    fn test_limit_is_enforced() {
        let mut writes = PendingWrites::new(4, 10);
        writes.append(&peer(), &characteristic(), &[0; 8]).unwrap();
        assert_eq!(
            writes.append(&peer(), &characteristic(), &[0; 3]),
            Err(GattError::BufferOverflow {
                requested: 11,
                limit: 10
            })
        );
        writes.append(&peer(), &characteristic(), &[0; 2]).unwrap();
        assert_eq!(writes.buffered_len(&peer(), &characteristic()), 10);
    }

    #[test]
    fn test_cancel_discards_peer_buffers() {
        let mut writes = PendingWrites::new(16, 1024);
        let other = PeerAddress::new([9; 6]);
        writes.append(&peer(), &characteristic(), b"abc").unwrap();
        writes.append(&other, &characteristic(), b"xyz").unwrap();

        writes.cancel(&peer());
        assert!(writes.take(&peer()).is_empty());
        assert_eq!(writes.buffered_len(&other, &characteristic()), 3);
    }
}
