//! Splits packets that do not fit a link's maximum transmission unit.
//!
//! Every fragment repeats the original framing fields. The payload is cut
//! into chunks of `MTU - header length` bytes, where the header length is
//! measured on the packet being fragmented. Offsets count bytes into the
//! original message, so a fragment can itself be fragmented again further
//! down the path.

use crate::packet::Packet;

/// The largest encoded packet a link carries, in bytes
pub type Mtu = u32;

/// The result of packet fragmentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragments {
    /// The packet was fragmented
    Fragmented(Vec<Packet>),
    /// The packet does not require fragmentation
    DontFragment(Packet),
    /// The packet required fragmentation but the MTU leaves no room for
    /// payload once the header is written
    Discard,
    /// The packet's payload would run past the largest offset the framing
    /// can carry
    OffsetOverflow,
}

impl Fragments {
    /// The fragments in the order they should be sent. Empty for
    /// [`Fragments::Discard`] and [`Fragments::OffsetOverflow`].
    pub fn into_packets(self) -> Vec<Packet> {
        match self {
            Fragments::Fragmented(fragments) => fragments,
            Fragments::DontFragment(packet) => vec![packet],
            Fragments::Discard | Fragments::OffsetOverflow => vec![],
        }
    }
}

/// Divide the packet into parts that can fit within the MTU of the link
pub fn fragment(packet: Packet, mtu: Mtu) -> Fragments {
    let mtu = mtu as usize;
    if packet.encoded_len() <= mtu {
        return Fragments::DontFragment(packet);
    }
    let header_len = packet.header_len();
    if mtu <= header_len {
        return Fragments::Discard;
    }
    if packet.offset.checked_add(packet.payload.len() as u32).is_none()
        || u32::try_from(packet.payload.len()).is_err()
    {
        return Fragments::OffsetOverflow;
    }
    Fragments::Fragmented(split(packet, mtu - header_len))
}

/// Cuts the payload into `chunk` sized pieces. All but the last piece have the
/// more fragments flag set; the last one keeps the flag of the packet being
/// split so that fragments of fragments stay consistent.
fn split(mut packet: Packet, chunk: usize) -> Vec<Packet> {
    let payload = std::mem::take(&mut packet.payload);
    let last_flag = packet.more_fragments;
    let mut offset = packet.offset;

    let mut fragments = Vec::with_capacity((payload.len() + chunk - 1) / chunk);
    let mut pieces = payload.chunks(chunk).peekable();
    while let Some(piece) = pieces.next() {
        let more_fragments = pieces.peek().is_some() || last_flag;
        fragments.push(Packet {
            offset,
            size: piece.len() as u32,
            more_fragments,
            payload: piece.to_vec(),
            ..packet.clone()
        });
        // Cannot wrap: the end of the payload was checked to fit in a u32
        offset = offset.wrapping_add(piece.len() as u32);
    }
    fragments
}
