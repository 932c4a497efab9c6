//! Puts fragmented messages back together at their destination.
//!
//! Fragments are buffered by fragment identifier until the buffered set,
//! sorted by offset, starts at offset 0, ends with a fragment whose more
//! fragments flag is clear, and covers every byte in between exactly once.
//! Buffers that stop receiving fragments are evicted after a configurable
//! idle period so a lost fragment cannot pin memory forever.

use crate::packet::Packet;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How long a partially received message is kept after its latest fragment
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(15);

/// Rebuilds a message from a set of fragments sharing one fragment
/// identifier, in any order.
///
/// Returns `None` if the set does not yet form a complete message: the lowest
/// offset is not 0, the highest offset fragment still announces more
/// fragments, a fragment's declared size disagrees with its payload, or the
/// fragments leave a gap or overlap. Callers keep buffering in that case.
pub fn reassemble(fragments: &[Packet]) -> Option<Packet> {
    let mut sorted: Vec<&Packet> = fragments.iter().collect();
    sorted.sort_by_key(|fragment| fragment.offset);

    let first = *sorted.first()?;
    let last = *sorted.last()?;
    if first.offset != 0 || last.more_fragments {
        return None;
    }

    let mut expected_offset = 0u32;
    let mut payload = Vec::new();
    for fragment in sorted {
        if fragment.offset != expected_offset || fragment.size as usize != fragment.payload.len()
        {
            return None;
        }
        payload.extend_from_slice(&fragment.payload);
        expected_offset = expected_offset.checked_add(fragment.size)?;
    }

    Some(Packet {
        size: expected_offset,
        more_fragments: false,
        payload,
        ..first.clone()
    })
}

/// Per-router reassembly buffers keyed by fragment identifier.
#[derive(Debug, Clone)]
pub struct Reassembly {
    pending: FxHashMap<u16, Pending>,
    expiry: Duration,
}

#[derive(Debug, Clone)]
struct Pending {
    fragments: Vec<Packet>,
    /// When the latest fragment arrived
    updated: Instant,
}

/// The outcome of [`Reassembly::add_fragment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddFragmentResult {
    /// The added fragment completed the message
    Complete(Packet),
    /// The message is still missing data. Carries the number of fragments
    /// buffered so far.
    Incomplete(usize),
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl Reassembly {
    /// Creates an empty set of buffers that evicts messages idle for longer
    /// than `expiry`.
    pub fn new(expiry: Duration) -> Self {
        Self {
            pending: Default::default(),
            expiry,
        }
    }

    /// Buffers a fragment and tries to complete its message. A complete
    /// message's buffer is released. A fragment repeating the offset of one
    /// already buffered replaces it, so duplicated datagrams do not poison the
    /// buffer. A whole message passes straight through and leaves any buffer
    /// under the same identifier untouched.
    pub fn add_fragment(&mut self, fragment: Packet, now: Instant) -> AddFragmentResult {
        if fragment.is_whole() {
            if let Some(pending) = self.pending.get(&fragment.fragment_id) {
                tracing::warn!(
                    fragment_id = fragment.fragment_id,
                    buffered = pending.fragments.len(),
                    "Whole message shares its fragment id with an incomplete one"
                );
            }
            return AddFragmentResult::Complete(fragment);
        }

        let id = fragment.fragment_id;
        let pending = self.pending.entry(id).or_insert_with(|| Pending {
            fragments: vec![],
            updated: now,
        });
        pending.updated = now;
        match pending
            .fragments
            .iter_mut()
            .find(|buffered| buffered.offset == fragment.offset)
        {
            Some(buffered) => *buffered = fragment,
            None => pending.fragments.push(fragment),
        }

        match reassemble(&pending.fragments) {
            Some(packet) => {
                self.pending.remove(&id);
                AddFragmentResult::Complete(packet)
            }
            None => AddFragmentResult::Incomplete(pending.fragments.len()),
        }
    }

    /// Drops every buffer whose latest fragment is older than the expiry.
    /// Returns the identifiers that were dropped.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<u16> {
        let expiry = self.expiry;
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.updated) > expiry)
            .map(|(id, _)| *id)
            .collect();
        for id in expired.iter() {
            self.pending.remove(id);
        }
        expired
    }

    /// Abandons every partially received message.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// The number of messages waiting on more fragments.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragmentation::{fragment, Mtu};
    use std::net::SocketAddrV4;

    fn message(id: u16, len: usize) -> Packet {
        let payload: Vec<u8> = (0..len).map(|i| b'A' + (i % 26) as u8).collect();
        Packet::new(
            "127.0.0.1:8883".parse::<SocketAddrV4>().unwrap(),
            12,
            id,
            payload,
        )
    }

    fn fragments_of(packet: &Packet, room: usize) -> Vec<Packet> {
        let mtu = (packet.header_len() + room) as Mtu;
        fragment(packet.clone(), mtu)
            .into_packets()
            .into_iter()
            // Fragments travel as datagrams
            .map(|f| Packet::from_bytes(&f.to_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn reassembles_in_any_order() {
        let original = message(1, 50);
        let mut fragments = fragments_of(&original, 16);
        assert_eq!(fragments.len(), 4);

        assert_eq!(reassemble(&fragments), Some(original.clone()));
        fragments.reverse();
        assert_eq!(reassemble(&fragments), Some(original.clone()));
        fragments.swap(0, 2);
        assert_eq!(reassemble(&fragments), Some(original));
    }

    #[test]
    fn rejects_missing_first_fragment() {
        let fragments = fragments_of(&message(1, 50), 16);
        assert_eq!(reassemble(&fragments[1..]), None);
    }

    #[test]
    fn rejects_missing_last_fragment() {
        let fragments = fragments_of(&message(1, 50), 16);
        assert_eq!(reassemble(&fragments[..3]), None);
    }

    #[test]
    fn rejects_gap() {
        let mut fragments = fragments_of(&message(1, 50), 16);
        fragments.remove(1);
        assert_eq!(reassemble(&fragments), None);
    }

    #[test]
    fn rejects_overlap() {
        let mut fragments = fragments_of(&message(1, 50), 16);
        fragments[1].offset -= 1;
        assert_eq!(reassemble(&fragments), None);
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut fragments = fragments_of(&message(1, 50), 16);
        fragments[2].size += 1;
        assert_eq!(reassemble(&fragments), None);
    }

    #[test]
    fn rejects_empty_set() {
        assert_eq!(reassemble(&[]), None);
    }

    #[test]
    fn buffers_until_complete() {
        let now = Instant::now();
        let original = message(5, 40);
        let fragments = fragments_of(&original, 10);
        let mut reassembly = Reassembly::default();

        let (last, rest) = fragments.split_last().unwrap();
        for (received, fragment) in rest.iter().rev().enumerate() {
            assert_eq!(
                reassembly.add_fragment(fragment.clone(), now),
                AddFragmentResult::Incomplete(received + 1)
            );
        }
        assert_eq!(reassembly.pending_count(), 1);
        assert_eq!(
            reassembly.add_fragment(last.clone(), now),
            AddFragmentResult::Complete(original)
        );
        assert_eq!(reassembly.pending_count(), 0);
    }

    #[test]
    fn whole_packet_completes_immediately() {
        let mut reassembly = Reassembly::default();
        let packet = message(9, 8);
        assert_eq!(
            reassembly.add_fragment(packet.clone(), Instant::now()),
            AddFragmentResult::Complete(packet)
        );
        assert_eq!(reassembly.pending_count(), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn whole_packet_keeps_partial_with_same_id() {
        let now = Instant::now();
        let original = message(4, 30);
        let fragments = fragments_of(&original, 10);
        let mut reassembly = Reassembly::default();

        reassembly.add_fragment(fragments[0].clone(), now);
        reassembly.add_fragment(fragments[1].clone(), now);
        let whole = message(4, 8);
        assert_eq!(
            reassembly.add_fragment(whole.clone(), now),
            AddFragmentResult::Complete(whole)
        );
        assert!(logs_contain("shares its fragment id"));
        assert_eq!(reassembly.pending_count(), 1);

        assert_eq!(
            reassembly.add_fragment(fragments[2].clone(), now),
            AddFragmentResult::Complete(original)
        );
        assert_eq!(reassembly.pending_count(), 0);
    }

    #[test]
    fn duplicate_fragment_is_replaced() {
        let now = Instant::now();
        let original = message(3, 30);
        let fragments = fragments_of(&original, 10);
        let mut reassembly = Reassembly::default();

        reassembly.add_fragment(fragments[0].clone(), now);
        assert_eq!(
            reassembly.add_fragment(fragments[0].clone(), now),
            AddFragmentResult::Incomplete(1)
        );
        reassembly.add_fragment(fragments[1].clone(), now);
        assert_eq!(
            reassembly.add_fragment(fragments[2].clone(), now),
            AddFragmentResult::Complete(original)
        );
    }

    #[test]
    fn separate_ids_do_not_mix() {
        let now = Instant::now();
        let first = fragments_of(&message(1, 30), 10);
        let second = fragments_of(&message(2, 30), 10);
        let mut reassembly = Reassembly::default();

        reassembly.add_fragment(first[0].clone(), now);
        reassembly.add_fragment(second[1].clone(), now);
        reassembly.add_fragment(first[2].clone(), now);
        assert_eq!(reassembly.pending_count(), 2);
        assert!(matches!(
            reassembly.add_fragment(first[1].clone(), now),
            AddFragmentResult::Complete(packet) if packet.fragment_id == 1
        ));
        assert_eq!(reassembly.pending_count(), 1);
    }

    #[test]
    fn evicts_idle_buffers() {
        let start = Instant::now();
        let expiry = Duration::from_secs(15);
        let first = fragments_of(&message(1, 30), 10);
        let second = fragments_of(&message(2, 30), 10);
        let mut reassembly = Reassembly::new(expiry);

        reassembly.add_fragment(first[0].clone(), start);
        reassembly.add_fragment(second[0].clone(), start + Duration::from_secs(10));

        assert!(reassembly.evict_expired(start + expiry).is_empty());
        assert_eq!(
            reassembly.evict_expired(start + Duration::from_secs(16)),
            vec![1]
        );
        assert_eq!(reassembly.pending_count(), 1);

        reassembly.clear();
        assert_eq!(reassembly.pending_count(), 0);
    }
}
