//! The comma separated text framing carried in every datagram.
//!
//! Two framings exist. The fragmenting framing has eight fields:
//!
//! ```text
//! DestinationIP,DestinationPort,TTL,FragmentID,Offset,Size,MoreFragments,Payload
//! ```
//!
//! where `Size` is always written as eight zero padded digits. The basic
//! framing used by forwarding-only routers keeps just the address and the
//! payload:
//!
//! ```text
//! DestinationIP,DestinationPort,Payload
//! ```
//!
//! The payload is everything after the last framing comma, so it may contain
//! commas and newlines of its own.

use std::{
    fmt::{self, Display, Formatter},
    net::{Ipv4Addr, SocketAddrV4},
    str::FromStr,
};
use thiserror::Error as ThisError;

/// The number of fields in a fragmenting packet, payload included
pub const FRAGMENTING_FIELDS: usize = 8;
/// The number of fields in a basic packet, payload included
pub const BASIC_FIELDS: usize = 3;
/// The width the size field is zero padded to
pub const SIZE_DIGITS: usize = 8;
/// The time to live given to packets that do not carry one on the wire and to
/// packets a router originates itself
pub const DEFAULT_TTL: u8 = 20;

/// A single framing unit, either a whole message or one fragment of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    /// The address of the router the payload is meant for
    pub destination: Ipv4Addr,
    /// The listening port of the router the payload is meant for
    pub port: u16,
    /// The number of remaining hops before the packet is discarded
    pub time_to_live: u8,
    /// Correlates the fragments of one original message
    pub fragment_id: u16,
    /// Byte offset of this payload within the original message
    pub offset: u32,
    /// The declared payload length in bytes
    pub size: u32,
    /// Set on every fragment but the last one
    pub more_fragments: bool,
    /// Opaque message content
    pub payload: Vec<u8>,
}

impl Packet {
    /// Creates an unfragmented packet whose size field matches the payload.
    pub fn new(
        destination: SocketAddrV4,
        time_to_live: u8,
        fragment_id: u16,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let payload = payload.into();
        Self {
            destination: *destination.ip(),
            port: destination.port(),
            time_to_live,
            fragment_id,
            offset: 0,
            size: payload.len() as u32,
            more_fragments: false,
            payload,
        }
    }

    /// The destination as a socket address.
    pub fn destination_address(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.destination, self.port)
    }

    /// Whether the packet is a whole message rather than a fragment of one.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && !self.more_fragments
    }

    /// The framing fields preceding the payload, including the trailing
    /// separator.
    pub fn header(&self) -> String {
        format!(
            "{},{},{},{},{},{:0width$},{},",
            self.destination,
            self.port,
            self.time_to_live,
            self.fragment_id,
            self.offset,
            self.size,
            self.more_fragments as u8,
            width = SIZE_DIGITS,
        )
    }

    /// The number of bytes taken by [`Packet::header`].
    pub fn header_len(&self) -> usize {
        self.header().len()
    }

    /// Serializes the packet with the fragmenting framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header().into_bytes();
        out.extend_from_slice(&self.payload);
        out
    }

    /// The number of bytes taken by [`Packet::to_bytes`].
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Parses a packet with the fragmenting framing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let fields = split_fields(bytes, FRAGMENTING_FIELDS)?;
        let more_fragments = match parse_int::<u8>(fields[6], "more fragments")? {
            0 => false,
            1 => true,
            other => Err(PacketError::InvalidFlag(other))?,
        };
        Ok(Self {
            destination: parse_address(fields[0])?,
            port: parse_int(fields[1], "destination port")?,
            time_to_live: parse_int(fields[2], "time to live")?,
            fragment_id: parse_int(fields[3], "fragment id")?,
            offset: parse_int(fields[4], "offset")?,
            size: parse_int(fields[5], "size")?,
            more_fragments,
            payload: fields[7].to_vec(),
        })
    }

    /// Serializes the packet with the basic framing. Only the destination and
    /// the payload are written.
    pub fn to_basic_bytes(&self) -> Vec<u8> {
        let mut out = format!("{},{},", self.destination, self.port).into_bytes();
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a packet with the basic framing. The framing does not carry a
    /// TTL, so the packet gets `time_to_live`. Other missing fields take their
    /// defaults.
    pub fn from_basic_bytes(bytes: &[u8], time_to_live: u8) -> Result<Self, PacketError> {
        let fields = split_fields(bytes, BASIC_FIELDS)?;
        let destination = SocketAddrV4::new(
            parse_address(fields[0])?,
            parse_int(fields[1], "destination port")?,
        );
        Ok(Self::new(destination, time_to_live, 0, fields[2]))
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ttl={} id={} offset={} size={} mf={}",
            self.destination,
            self.port,
            self.time_to_live,
            self.fragment_id,
            self.offset,
            self.size,
            self.more_fragments as u8
        )
    }
}

/// Selects which wire layout a router speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Framing {
    /// Eight fields, with TTL and fragmentation fields
    #[default]
    Fragmenting,
    /// Three fields: destination address, destination port and payload
    Basic,
}

impl Framing {
    /// The number of comma separated fields, payload included.
    pub const fn field_count(self) -> usize {
        match self {
            Framing::Fragmenting => FRAGMENTING_FIELDS,
            Framing::Basic => BASIC_FIELDS,
        }
    }

    /// Whether the framing carries the fields needed for fragmentation.
    pub const fn fragments(self) -> bool {
        matches!(self, Framing::Fragmenting)
    }

    pub fn encode(self, packet: &Packet) -> Vec<u8> {
        match self {
            Framing::Fragmenting => packet.to_bytes(),
            Framing::Basic => packet.to_basic_bytes(),
        }
    }

    /// Parses a datagram. `time_to_live` is only used by framings that do not
    /// carry one.
    pub fn decode(self, bytes: &[u8], time_to_live: u8) -> Result<Packet, PacketError> {
        match self {
            Framing::Fragmenting => Packet::from_bytes(bytes),
            Framing::Basic => Packet::from_basic_bytes(bytes, time_to_live),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fragmenting" => Ok(Framing::Fragmenting),
            "basic" => Ok(Framing::Basic),
            other => Err(format!("unknown framing '{other}'")),
        }
    }
}

/// Splits a record into exactly `count` fields, the last one holding the
/// remainder.
fn split_fields(bytes: &[u8], count: usize) -> Result<Vec<&[u8]>, PacketError> {
    let fields: Vec<&[u8]> = bytes.splitn(count, |b| *b == b',').collect();
    if fields.len() < count {
        Err(PacketError::MissingFields {
            expected: count,
            found: fields.len(),
        })?
    }
    Ok(fields)
}

fn parse_address(field: &[u8]) -> Result<Ipv4Addr, PacketError> {
    let text = std::str::from_utf8(field).or(Err(PacketError::NonUtf8Header))?;
    text.parse()
        .or_else(|_| Err(PacketError::InvalidAddress(text.to_string())))
}

fn parse_int<T: FromStr>(field: &[u8], name: &'static str) -> Result<T, PacketError> {
    let text = std::str::from_utf8(field).or(Err(PacketError::NonUtf8Header))?;
    text.parse().or_else(|_| {
        Err(PacketError::InvalidInteger {
            field: name,
            value: text.to_string(),
        })
    })
}

/// A datagram that could not be turned into a [`Packet`].
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Expected {expected} comma separated fields but found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("The packet header is not valid UTF-8")]
    NonUtf8Header,
    #[error("'{0}' is not an IPv4 address")]
    InvalidAddress(String),
    #[error("The {field} field '{value}' is not a valid integer")]
    InvalidInteger { field: &'static str, value: String },
    #[error("The more fragments flag must be 0 or 1, found {0}")]
    InvalidFlag(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet {
            destination: Ipv4Addr::LOCALHOST,
            port: 8883,
            time_to_live: 10,
            fragment_id: 347,
            offset: 0,
            size: 13,
            more_fragments: false,
            payload: b"hello, router".to_vec(),
        }
    }

    #[test]
    fn encodes_fixed_width_size() {
        let packet = sample();
        assert_eq!(
            packet.to_bytes(),
            b"127.0.0.1,8883,10,347,0,00000013,0,hello, router".to_vec()
        );
        assert_eq!(packet.header_len(), "127.0.0.1,8883,10,347,0,00000013,0,".len());
    }

    #[test]
    fn round_trip() {
        let packet = sample();
        assert_eq!(Packet::from_bytes(&packet.to_bytes()), Ok(packet));

        let mut fragment = sample();
        fragment.offset = 4096;
        fragment.more_fragments = true;
        fragment.payload = b"line one\nline two".to_vec();
        fragment.size = fragment.payload.len() as u32;
        assert_eq!(Packet::from_bytes(&fragment.to_bytes()), Ok(fragment));
    }

    #[test]
    fn payload_keeps_commas() {
        let packet = Packet::from_bytes(b"10.0.0.5,5003,3,1,0,00000005,0,a,b,c").unwrap();
        assert_eq!(packet.payload, b"a,b,c".to_vec());
    }

    #[test]
    fn empty_payload() {
        let packet = Packet::from_bytes(b"10.0.0.5,5003,3,1,0,00000000,0,").unwrap();
        assert!(packet.payload.is_empty());
        assert!(packet.is_whole());
    }

    #[test]
    fn missing_fields() {
        assert_eq!(
            Packet::from_bytes(b"10.0.0.5,5003,3,1"),
            Err(PacketError::MissingFields {
                expected: 8,
                found: 4
            })
        );
        assert_eq!(
            Packet::from_basic_bytes(b"10.0.0.5", DEFAULT_TTL),
            Err(PacketError::MissingFields {
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn non_numeric_fields() {
        assert_eq!(
            Packet::from_bytes(b"10.0.0.5,port,3,1,0,00000001,0,x"),
            Err(PacketError::InvalidInteger {
                field: "destination port",
                value: "port".into()
            })
        );
        assert_eq!(
            Packet::from_bytes(b"10.0.0.5,5003,-1,1,0,00000001,0,x"),
            Err(PacketError::InvalidInteger {
                field: "time to live",
                value: "-1".into()
            })
        );
        assert_eq!(
            Packet::from_bytes(b"router,5003,3,1,0,00000001,0,x"),
            Err(PacketError::InvalidAddress("router".into()))
        );
        assert_eq!(
            Packet::from_bytes(b"10.0.0.5,5003,3,1,0,00000001,2,x"),
            Err(PacketError::InvalidFlag(2))
        );
    }

    #[test]
    fn basic_framing() {
        let packet = Framing::Basic
            .decode(b"127.0.0.1,8882,hi there", DEFAULT_TTL)
            .unwrap();
        assert_eq!(
            packet.destination_address(),
            "127.0.0.1:8882".parse::<SocketAddrV4>().unwrap()
        );
        assert_eq!(packet.time_to_live, DEFAULT_TTL);
        assert_eq!(packet.payload, b"hi there".to_vec());
        assert_eq!(Framing::Basic.encode(&packet), b"127.0.0.1,8882,hi there".to_vec());

        let packet = Framing::Basic.decode(b"127.0.0.1,8882,x", 3).unwrap();
        assert_eq!(packet.time_to_live, 3);
        // Fragmenting datagrams keep their own TTL
        let packet = Framing::Fragmenting
            .decode(b"127.0.0.1,8882,9,1,0,00000001,0,x", 3)
            .unwrap();
        assert_eq!(packet.time_to_live, 9);
    }
}
