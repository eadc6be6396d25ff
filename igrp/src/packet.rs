//! Protocol packets on the wire.
//!
//! A packet is a fixed 12 byte [`Header`] followed by zero or more 14 byte route records
//! ([`MetricVector`]s). All fields are in network byte order. The checksum is always sent as 0,
//! and the receive side compares against the same always-zero computation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::vector::{MetricVector, RECORD_WIRE_SIZE};

/// The version of the protocol we are currently using.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of a header on the wire.
pub const HEADER_WIRE_SIZE: usize = 12;

/// The maximum amount of route records in a single update packet.
pub const MAX_ROUTES_PER_UPDATE: usize = 104;

/// Packet opcode for a request.
const OPCODE_REQUEST: u8 = 1;
/// Packet opcode for an update.
const OPCODE_UPDATE: u8 = 2;

/// Error returned when a packet can't be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than a header are available.
    #[error("packet of {0} bytes is too short to hold a header")]
    Truncated(usize),
    /// The header announces a version we don't speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// The opcode is neither request nor update.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
}

/// The kind of packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A neighbour asks for our routing table.
    Request,
    /// A neighbour advertises (part of) its routing table.
    Update,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            OPCODE_REQUEST => Ok(Opcode::Request),
            OPCODE_UPDATE => Ok(Opcode::Update),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Request => OPCODE_REQUEST,
            Opcode::Update => OPCODE_UPDATE,
        }
    }
}

/// The header of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    opcode: Opcode,
    /// Sequence number of the update, incremented for every update the sender transmits.
    edition: u8,
    /// Autonomous system of the sender.
    autonomous_system: u16,
    /// Amount of interior routes in the packet.
    interior: u16,
    /// Amount of system routes in the packet.
    system: u16,
    /// Amount of exterior routes in the packet.
    exterior: u16,
    checksum: u16,
}

impl Header {
    /// Create a new `Header`. The checksum is filled in when the packet is encoded.
    pub fn new(
        opcode: Opcode,
        edition: u8,
        autonomous_system: u16,
        interior: u16,
        system: u16,
        exterior: u16,
    ) -> Self {
        Self {
            opcode,
            edition,
            autonomous_system,
            interior,
            system,
            exterior,
            checksum: 0,
        }
    }

    /// Return the [`Opcode`] of the packet.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Return the edition of the packet.
    pub fn edition(&self) -> u8 {
        self.edition
    }

    /// Return the autonomous system of the sender.
    pub fn autonomous_system(&self) -> u16 {
        self.autonomous_system
    }

    /// Return the amount of interior routes announced in the header.
    pub fn interior(&self) -> u16 {
        self.interior
    }

    /// Return the amount of system routes announced in the header.
    pub fn system(&self) -> u16 {
        self.system
    }

    /// Return the amount of exterior routes announced in the header.
    pub fn exterior(&self) -> u16 {
        self.exterior
    }

    /// Return the checksum as found on the wire.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    fn from_bytes(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let version_opcode = src.get_u8();
        let version = version_opcode >> 4;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let opcode = Opcode::try_from(version_opcode & 0x0F)?;

        Ok(Self {
            opcode,
            edition: src.get_u8(),
            autonomous_system: src.get_u16(),
            interior: src.get_u16(),
            system: src.get_u16(),
            exterior: src.get_u16(),
            checksum: src.get_u16(),
        })
    }

    fn write_bytes(&self, dst: &mut impl BufMut) {
        dst.put_u8((PROTOCOL_VERSION << 4) | u8::from(self.opcode));
        dst.put_u8(self.edition);
        dst.put_u16(self.autonomous_system);
        dst.put_u16(self.interior);
        dst.put_u16(self.system);
        dst.put_u16(self.exterior);
        dst.put_u16(self.checksum);
    }
}

/// A full packet: header and route records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    routes: Vec<MetricVector>,
}

impl Packet {
    /// Create a new `Packet`.
    pub fn new(header: Header, routes: Vec<MetricVector>) -> Self {
        Self { header, routes }
    }

    /// Create a request packet for the given autonomous system.
    pub fn request(autonomous_system: u16) -> Self {
        Self {
            header: Header::new(Opcode::Request, 0, autonomous_system, 0, 0, 0),
            routes: Vec::new(),
        }
    }

    /// Return the [`Header`] of the packet.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Return the route records in the packet.
    pub fn routes(&self) -> &[MetricVector] {
        &self.routes
    }

    /// Size of the encoded packet.
    pub fn wire_size(&self) -> usize {
        HEADER_WIRE_SIZE + self.routes.len() * RECORD_WIRE_SIZE
    }

    /// Decode a `Packet` from wire bytes.
    ///
    /// Trailing bytes which don't form a complete record are ignored.
    pub fn from_bytes(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < HEADER_WIRE_SIZE {
            trace!("Insufficient bytes to read a header");
            return Err(DecodeError::Truncated(src.remaining()));
        }

        let header = Header::from_bytes(src)?;
        trace!("Read header");

        let record_count = src.remaining() / RECORD_WIRE_SIZE;
        let mut routes = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            routes.push(MetricVector::from_bytes(src));
        }

        if src.has_remaining() {
            trace!("Ignoring {} trailing bytes", src.remaining());
            src.advance(src.remaining());
        }

        Ok(Self { header, routes })
    }

    /// Encode this `Packet`.
    pub fn write_bytes(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        let start = dst.len();
        self.header.write_bytes(dst);
        for route in &self.routes {
            route.write_bytes(dst);
        }
        let checksum = checksum(&dst[start..]);
        dst[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Encode this `Packet` into a new buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.write_bytes(&mut buf);
        buf.freeze()
    }

    /// Checks the checksum in the header against the packet contents.
    pub fn checksum_valid(&self, raw: &[u8]) -> bool {
        self.header.checksum == checksum(raw)
    }
}

/// Integrity checksum over an encoded packet. Always 0: both sides agree on this value, so no
/// real integrity checking happens.
fn checksum(_packet: &[u8]) -> u16 {
    0
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use bytes::Buf;

    use super::{DecodeError, Header, Opcode, Packet, HEADER_WIRE_SIZE, MAX_ROUTES_PER_UPDATE};
    use crate::{
        network::Network,
        vector::{MetricVector, U24},
    };

    #[test]
    fn encoding() {
        let packet = Packet::new(
            Header::new(Opcode::Update, 7, 0x0102, 0, 2, 1),
            vec![
                MetricVector::new(
                    Network::from_address(Ipv4Addr::new(10, 0, 0, 0)),
                    U24::new(100).unwrap(),
                    U24::new(1000).unwrap(),
                    1500,
                    1,
                    1,
                    1,
                ),
                MetricVector::new(
                    Network::from_address(Ipv4Addr::new(192, 168, 3, 0)),
                    U24::UNREACHABLE,
                    U24::new(0x010203).unwrap(),
                    0,
                    0,
                    0,
                    5,
                ),
            ],
        );

        let buf = packet.to_bytes();

        assert_eq!(buf.len(), 40);
        assert_eq!(
            buf[..],
            [
                0x12, 7, 1, 2, 0, 0, 0, 2, 0, 1, 0, 0, // header
                10, 0, 0, 0, 0, 100, 0, 3, 232, 5, 220, 1, 1, 1, // first route
                192, 168, 3, 255, 255, 255, 1, 2, 3, 0, 0, 0, 0, 5 // second route
            ]
        );
    }

    #[test]
    fn decoding() {
        let mut buf = bytes::BytesMut::from(
            &[
                0x12, 200, 0, 9, 0, 1, 0, 0, 0, 0, 0, 0, 172, 16, 0, 0, 0, 50, 0, 0, 10, 0, 0, 1,
                0, 2,
            ][..],
        );

        let packet = Packet::from_bytes(&mut buf).expect("Valid packet");
        assert_eq!(packet.header().opcode(), Opcode::Update);
        assert_eq!(packet.header().edition(), 200);
        assert_eq!(packet.header().autonomous_system(), 9);
        assert_eq!(packet.header().interior(), 1);
        assert_eq!(packet.routes().len(), 1);
        assert_eq!(
            packet.routes()[0].destination(),
            Network::from_address(Ipv4Addr::new(172, 16, 0, 0))
        );
        assert_eq!(packet.routes()[0].delay().get(), 50);
        assert_eq!(packet.routes()[0].inverse_bandwidth().get(), 10);
        assert_eq!(packet.routes()[0].hop_count(), 2);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn request_has_no_routes() {
        let raw = Packet::request(3).to_bytes();
        assert_eq!(raw.len(), HEADER_WIRE_SIZE);
        assert_eq!(raw[0], 0x11);

        let mut buf = bytes::BytesMut::from(&raw[..]);
        let packet = Packet::from_bytes(&mut buf).expect("Valid packet");
        assert_eq!(packet.header().opcode(), Opcode::Request);
        assert!(packet.routes().is_empty());
        assert!(packet.checksum_valid(&raw));
    }

    #[test]
    fn decode_rejects_bad_headers() {
        let mut buf = bytes::BytesMut::from(&[0x12, 0, 0][..]);
        assert_eq!(Packet::from_bytes(&mut buf), Err(DecodeError::Truncated(3)));

        let mut buf = bytes::BytesMut::from(&[0x22, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        assert_eq!(
            Packet::from_bytes(&mut buf),
            Err(DecodeError::UnsupportedVersion(2))
        );

        let mut buf = bytes::BytesMut::from(&[0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        assert_eq!(Packet::from_bytes(&mut buf), Err(DecodeError::UnknownOpcode(5)));
    }

    #[test]
    fn decode_ignores_partial_record() {
        let mut buf = bytes::BytesMut::from(
            &[0x12, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 10, 0, 0, 0, 0][..],
        );
        let packet = Packet::from_bytes(&mut buf).expect("Valid packet");
        assert!(packet.routes().is_empty());
        // Decoder still consumes the leftover bytes.
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn full_update_decodes_to_itself() {
        let routes: Vec<MetricVector> = (0..MAX_ROUTES_PER_UPDATE as u32)
            .map(|i| {
                let delay = if i % 2 == 0 {
                    U24::UNREACHABLE
                } else {
                    U24::new(i * 1000).unwrap()
                };
                MetricVector::new(
                    Network::from_number(U24::new(0xC0A800 + i).unwrap()),
                    delay,
                    U24::MAX,
                    u16::MAX,
                    u8::MAX,
                    u8::MAX,
                    i as u8,
                )
            })
            .collect();
        let packet = Packet::new(Header::new(Opcode::Update, 255, u16::MAX, 4, 100, 0), routes);

        let raw = packet.to_bytes();
        assert_eq!(raw.len(), HEADER_WIRE_SIZE + MAX_ROUTES_PER_UPDATE * 14);

        let mut buf = bytes::BytesMut::from(&raw[..]);
        let decoded = Packet::from_bytes(&mut buf).expect("Valid packet");
        assert_eq!(decoded, packet);
        assert!(decoded.checksum_valid(&raw));
        assert_eq!(buf.remaining(), 0);
    }
}
