//! The four header kinds and their nesting.
//!
//! A long frame is an [`AddressHeader`] carrying either a [`TransportHeader`]
//! or a [`DistanceVectorHeader`]. A short frame is a lone
//! [`DynamicAddressingHeader`]. [`Header`] is the closed union over all four.

use std::collections::BTreeMap;

use super::bits::{BitReader, BitWriter};
use crate::core::constants::{
    ADDRESS_BITS, ADDRESS_HEADER_SIZE, MAX_SEGMENT_PAYLOAD, PROTOCOL_DISTANCE_VECTOR,
    PROTOCOL_TRANSPORT, SEGMENT_LENGTH_BITS, SEQUENCE_BITS, SHORT_FRAME_SIZE,
    TRANSPORT_HEADER_SIZE,
};
use crate::core::{Address, BROADCAST_ADDRESS, PayloadError};

// =============================================================================
// ADDRESS HEADER
// =============================================================================

/// How the trailing 8-bit field of an address header is used.
///
/// Broadcast frames carry a flood id instead of a next hop, so the
/// destination and the meaning of the trailing field travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routing {
    /// Point-to-point frame relayed hop by hop.
    Unicast {
        /// Final destination.
        destination: Address,
        /// Neighbor expected to relay (or consume) the frame.
        next_hop: Address,
    },
    /// Frame for every reachable node.
    Broadcast {
        /// Flood identifier.
        id: u8,
    },
}

impl Routing {
    /// Destination address on the wire.
    pub fn destination(&self) -> Address {
        match self {
            Routing::Unicast { destination, .. } => *destination,
            Routing::Broadcast { .. } => BROADCAST_ADDRESS,
        }
    }

    /// Next hop, if this is a unicast frame.
    pub fn next_hop(&self) -> Option<Address> {
        match self {
            Routing::Unicast { next_hop, .. } => Some(*next_hop),
            Routing::Broadcast { .. } => None,
        }
    }

    fn trailing_field(&self) -> u8 {
        match self {
            Routing::Unicast { next_hop, .. } => *next_hop,
            Routing::Broadcast { id } => *id,
        }
    }
}

/// Header nested inside an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpperHeader {
    /// Transport segment (protocol 0).
    Transport(TransportHeader),
    /// Routing advertisement (protocol 2).
    DistanceVector(DistanceVectorHeader),
}

impl UpperHeader {
    /// Protocol id written into the enclosing header.
    pub fn protocol(&self) -> u8 {
        match self {
            UpperHeader::Transport(_) => PROTOCOL_TRANSPORT,
            UpperHeader::DistanceVector(_) => PROTOCOL_DISTANCE_VECTOR,
        }
    }

    /// Value of the enclosing header's `payloadLength` field.
    ///
    /// Transport: fixed header plus message bytes. Distance vector: entry
    /// count (one byte each).
    pub fn payload_length(&self) -> usize {
        match self {
            UpperHeader::Transport(t) => TRANSPORT_HEADER_SIZE + t.payload_length(),
            UpperHeader::DistanceVector(dv) => dv.len(),
        }
    }
}

/// Network-layer header of every long frame.
///
/// Wire format (32 bits, then the nested header):
/// ```text
/// +----------+-----+----------------+--------+-------------+---------------+
/// | protocol | ttl | payload length | source | destination | next hop / id |
/// | 4        | 4   | 8              | 4      | 4           | 8             |
/// +----------+-----+----------------+--------+-------------+---------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressHeader {
    /// Remaining hop budget.
    pub ttl: u8,
    /// Originating node.
    pub source: Address,
    /// Destination and trailing field.
    pub routing: Routing,
    /// Nested header.
    pub upper: UpperHeader,
}

impl AddressHeader {
    /// Wrap a transport segment for unicast delivery.
    pub fn transport(
        ttl: u8,
        source: Address,
        next_hop: Address,
        segment: TransportHeader,
    ) -> Self {
        Self {
            ttl,
            source,
            routing: Routing::Unicast {
                destination: segment.destination,
                next_hop,
            },
            upper: UpperHeader::Transport(segment),
        }
    }

    /// Wrap a distance vector for a neighbor broadcast.
    pub fn advertisement(ttl: u8, source: Address, id: u8, vector: DistanceVectorHeader) -> Self {
        Self {
            ttl,
            source,
            routing: Routing::Broadcast { id },
            upper: UpperHeader::DistanceVector(vector),
        }
    }

    /// Destination address.
    pub fn destination(&self) -> Address {
        self.routing.destination()
    }

    /// Nested protocol id.
    pub fn next_protocol(&self) -> u8 {
        self.upper.protocol()
    }

    /// Value of the `payloadLength` field.
    pub fn payload_length(&self) -> usize {
        self.upper.payload_length()
    }

    /// Encode the header and its nested header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut w = BitWriter::with_capacity(ADDRESS_HEADER_SIZE + self.payload_length());
        self.write_fixed(&mut w)?;
        match &self.upper {
            UpperHeader::Transport(t) => t.write(&mut w)?,
            UpperHeader::DistanceVector(dv) => dv.write(&mut w)?,
        }
        w.finish()
    }

    fn write_fixed(&self, w: &mut BitWriter) -> Result<(), PayloadError> {
        if let Routing::Unicast { destination, .. } = self.routing {
            if destination == BROADCAST_ADDRESS {
                return Err(PayloadError::UnicastToBroadcast);
            }
        }
        let payload_length = u32::try_from(self.payload_length()).unwrap_or(u32::MAX);
        w.write("next protocol", u32::from(self.next_protocol()), 4)?;
        w.write("ttl", u32::from(self.ttl), 4)?;
        w.write("payload length", payload_length, 8)?;
        w.write("source", u32::from(self.source), ADDRESS_BITS)?;
        w.write("destination", u32::from(self.destination()), ADDRESS_BITS)?;
        w.write("next hop", u32::from(self.routing.trailing_field()), 8)
    }

    /// Decode a long frame.
    ///
    /// Bytes past the nested header (channel padding) are ignored. The
    /// decoded transport segment takes its destination from this header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = BitReader::new(bytes);
        let protocol = r.read_u8(4)?;
        let ttl = r.read_u8(4)?;
        let payload_length = r.read_u8(8)?;
        let source = r.read_u8(ADDRESS_BITS)?;
        let destination = r.read_u8(ADDRESS_BITS)?;
        let trailing = r.read_u8(8)?;

        let routing = if destination == BROADCAST_ADDRESS {
            Routing::Broadcast { id: trailing }
        } else {
            Routing::Unicast {
                destination,
                next_hop: trailing,
            }
        };

        let upper = match protocol {
            PROTOCOL_TRANSPORT => UpperHeader::Transport(TransportHeader::read(&mut r, destination)?),
            PROTOCOL_DISTANCE_VECTOR => UpperHeader::DistanceVector(DistanceVectorHeader::read(
                &mut r,
                usize::from(payload_length),
            )?),
            other => return Err(PayloadError::UnknownProtocol(other)),
        };

        Ok(Self {
            ttl,
            source,
            routing,
            upper,
        })
    }
}

// =============================================================================
// TRANSPORT HEADER
// =============================================================================

/// Reduced TCP-like segment header.
///
/// Wire format (32 bits, then `payload length` message bytes):
/// ```text
/// +----------+-----+-----+-----+----------------+
/// | sequence | SYN | ACK | FIN | payload length |
/// | 23       | 1   | 1   | 1   | 6              |
/// +----------+-----+-----+-----+----------------+
/// ```
///
/// `destination` is not on the wire; the address header supplies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Sequence number, below 2^23.
    pub sequence: u32,
    /// First chunk of a message.
    pub syn: bool,
    /// Acknowledgment.
    pub ack: bool,
    /// Last chunk of a message.
    pub fin: bool,
    /// Message chunk.
    pub message: String,
    /// Peer this segment is for.
    pub destination: Address,
}

impl TransportHeader {
    /// Create a data segment.
    pub fn data(sequence: u32, message: impl Into<String>, destination: Address) -> Self {
        Self {
            sequence,
            syn: false,
            ack: false,
            fin: false,
            message: message.into(),
            destination,
        }
    }

    /// Create an empty acknowledgment.
    pub fn ack(sequence: u32, fin: bool, destination: Address) -> Self {
        Self {
            sequence,
            syn: false,
            ack: true,
            fin,
            message: String::new(),
            destination,
        }
    }

    /// Set SYN.
    pub fn with_syn(mut self, syn: bool) -> Self {
        self.syn = syn;
        self
    }

    /// Set FIN.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Set ACK.
    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    /// Message length in bytes.
    pub fn payload_length(&self) -> usize {
        self.message.len()
    }

    /// An acknowledgment from a receiver: ACK set and no text.
    pub fn is_acknowledgment(&self) -> bool {
        self.ack && self.message.is_empty()
    }

    /// A sender's closing ACK+FIN, which repeats its last chunk.
    pub fn is_closing(&self) -> bool {
        self.ack && self.fin && !self.message.is_empty()
    }

    /// Encode this header on its own.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut w = BitWriter::with_capacity(TRANSPORT_HEADER_SIZE + self.payload_length());
        self.write(&mut w)?;
        w.finish()
    }

    /// Decode a standalone transport header.
    pub fn from_bytes(bytes: &[u8], destination: Address) -> Result<Self, PayloadError> {
        Self::read(&mut BitReader::new(bytes), destination)
    }

    pub(crate) fn write(&self, w: &mut BitWriter) -> Result<(), PayloadError> {
        if self.payload_length() > MAX_SEGMENT_PAYLOAD {
            return Err(PayloadError::FieldOutOfRange {
                field: "payload length",
                value: u32::try_from(self.payload_length()).unwrap_or(u32::MAX),
                bits: SEGMENT_LENGTH_BITS,
            });
        }
        w.write("sequence", self.sequence, SEQUENCE_BITS)?;
        w.write_flag(self.syn);
        w.write_flag(self.ack);
        w.write_flag(self.fin);
        w.write("payload length", self.payload_length() as u32, SEGMENT_LENGTH_BITS)?;
        w.write_bytes(self.message.as_bytes());
        Ok(())
    }

    pub(crate) fn read(r: &mut BitReader<'_>, destination: Address) -> Result<Self, PayloadError> {
        let sequence = r.read(SEQUENCE_BITS)?;
        let syn = r.read_flag()?;
        let ack = r.read_flag()?;
        let fin = r.read_flag()?;
        let len = r.read(SEGMENT_LENGTH_BITS)? as usize;
        let message = String::from_utf8(r.read_bytes(len)?).map_err(|_| PayloadError::InvalidUtf8)?;
        Ok(Self {
            sequence,
            syn,
            ack,
            fin,
            message,
            destination,
        })
    }
}

// =============================================================================
// DISTANCE VECTOR HEADER
// =============================================================================

/// Routing advertisement: destination to cost, one byte per entry.
///
/// ```text
/// +-------------+------+
/// | destination | cost |  x entry count
/// | 4           | 4    |
/// +-------------+------+
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistanceVectorHeader {
    entries: BTreeMap<Address, u8>,
}

impl DistanceVectorHeader {
    /// Create a vector from destination/cost pairs.
    pub fn new(entries: impl IntoIterator<Item = (Address, u8)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Advertised entries, ordered by destination.
    pub fn entries(&self) -> &BTreeMap<Address, u8> {
        &self.entries
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode this vector on its own.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut w = BitWriter::with_capacity(self.len());
        self.write(&mut w)?;
        w.finish()
    }

    /// Decode `count` entries.
    pub fn from_bytes(bytes: &[u8], count: usize) -> Result<Self, PayloadError> {
        Self::read(&mut BitReader::new(bytes), count)
    }

    pub(crate) fn write(&self, w: &mut BitWriter) -> Result<(), PayloadError> {
        if self.entries.is_empty() {
            return Err(PayloadError::EmptyDistanceVector);
        }
        for (&destination, &cost) in &self.entries {
            w.write("destination", u32::from(destination), ADDRESS_BITS)?;
            w.write("cost", u32::from(cost), 4)?;
        }
        Ok(())
    }

    pub(crate) fn read(r: &mut BitReader<'_>, count: usize) -> Result<Self, PayloadError> {
        if count == 0 {
            return Err(PayloadError::EmptyDistanceVector);
        }
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let destination = r.read_u8(ADDRESS_BITS)?;
            let cost = r.read_u8(4)?;
            entries.insert(destination, cost);
        }
        Ok(Self { entries })
    }
}

// =============================================================================
// DYNAMIC ADDRESSING HEADER
// =============================================================================

/// HELLO / CONFLICT beacon, sent as a short frame.
///
/// ```text
/// +----------+----------+----------+---------+
/// | protocol | conflict | sequence | address |
/// | 3        | 1        | 8        | 4       |
/// +----------+----------+----------+---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicAddressingHeader {
    /// Protocol id, below 8.
    pub protocol: u8,
    /// CONFLICT rather than HELLO.
    pub conflict: bool,
    /// Deduplication sequence.
    pub sequence: u8,
    /// Address being announced or contested.
    pub address: Address,
}

impl DynamicAddressingHeader {
    /// Encode to the 2-byte short frame.
    pub fn to_bytes(&self) -> Result<[u8; SHORT_FRAME_SIZE], PayloadError> {
        let mut w = BitWriter::with_capacity(SHORT_FRAME_SIZE);
        w.write("protocol", u32::from(self.protocol), 3)?;
        w.write_flag(self.conflict);
        w.write("sequence", u32::from(self.sequence), 8)?;
        w.write("address", u32::from(self.address), ADDRESS_BITS)?;
        let bytes = w.finish()?;
        Ok([bytes[0], bytes[1]])
    }

    /// Decode a short frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = BitReader::new(bytes);
        Ok(Self {
            protocol: r.read_u8(3)?,
            conflict: r.read_flag()?,
            sequence: r.read_u8(8)?,
            address: r.read_u8(ADDRESS_BITS)?,
        })
    }
}

// =============================================================================
// HEADER UNION
// =============================================================================

/// Any of the four header kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// Long frame.
    Address(AddressHeader),
    /// Bare transport header.
    Transport(TransportHeader),
    /// Bare distance vector.
    DistanceVector(DistanceVectorHeader),
    /// Short frame.
    DynamicAddressing(DynamicAddressingHeader),
}

impl Header {
    /// Nested header, if this kind carries one.
    pub fn upper(&self) -> Option<&UpperHeader> {
        match self {
            Header::Address(h) => Some(&h.upper),
            _ => None,
        }
    }

    /// Destination, for the kinds that have one.
    pub fn destination(&self) -> Option<Address> {
        match self {
            Header::Address(h) => Some(h.destination()),
            Header::Transport(h) => Some(h.destination),
            Header::DistanceVector(_) => None,
            Header::DynamicAddressing(h) => Some(h.address),
        }
    }

    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Header::Address(_) => "address",
            Header::Transport(_) => "transport",
            Header::DistanceVector(_) => "distance-vector",
            Header::DynamicAddressing(_) => "dynamic-addressing",
        }
    }

    /// Encode this header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        match self {
            Header::Address(h) => h.to_bytes(),
            Header::Transport(h) => h.to_bytes(),
            Header::DistanceVector(h) => h.to_bytes(),
            Header::DynamicAddressing(h) => h.to_bytes().map(|b| b.to_vec()),
        }
    }
}

impl From<AddressHeader> for Header {
    fn from(h: AddressHeader) -> Self {
        Header::Address(h)
    }
}

impl From<DynamicAddressingHeader> for Header {
    fn from(h: DynamicAddressingHeader) -> Self {
        Header::DynamicAddressing(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bits::{bits_to_bytes, bytes_to_bits};
    use crate::core::constants::LONG_FRAME_SIZE;

    #[test]
    fn test_address_header_layout() {
        let segment = TransportHeader::data(1, "hi", 9).with_syn(true).with_fin(true);
        let header = AddressHeader::transport(10, 3, 5, segment);
        let bytes = header.to_bytes().unwrap();

        // protocol 0, ttl 10, length 6, source 3, destination 9, next hop 5
        assert_eq!(hex::encode(&bytes[..4]), "0a063905");
        // sequence 1, SYN, FIN, length 2
        assert_eq!(hex::encode(&bytes[4..8]), "00000342");
        assert_eq!(&bytes[8..], b"hi");
    }

    #[test]
    fn test_long_frame_round_trip_with_padding() {
        let segment = TransportHeader::data(4_000_000, "hello world", 2).with_ack(true);
        let header = AddressHeader::transport(7, 12, 2, segment);
        let mut bytes = header.to_bytes().unwrap();
        bytes.resize(LONG_FRAME_SIZE, 0);

        let decoded = AddressHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_length(), 4 + 11);
    }

    #[test]
    fn test_broadcast_uses_id_field() {
        let dv = DistanceVectorHeader::new([(1, 0), (4, 2), (15, 7)]);
        let header = AddressHeader::advertisement(1, 1, 200, dv.clone());
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 4 + 3);
        assert_eq!(bytes[3], 200);

        let decoded = AddressHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.routing, Routing::Broadcast { id: 200 });
        assert_eq!(decoded.routing.next_hop(), None);
        assert_eq!(decoded.upper, UpperHeader::DistanceVector(dv));
    }

    #[test]
    fn test_unicast_to_broadcast_address_is_refused() {
        let segment = TransportHeader::data(1, "hi", BROADCAST_ADDRESS);
        let header = AddressHeader::transport(10, 3, 5, segment);
        assert_eq!(header.to_bytes(), Err(PayloadError::UnicastToBroadcast));
    }

    #[test]
    fn test_segment_kinds() {
        assert!(TransportHeader::ack(3, true, 4).is_acknowledgment());
        assert!(!TransportHeader::ack(3, true, 4).is_closing());

        let closing = TransportHeader::data(3, "end", 4).with_ack(true).with_fin(true);
        assert!(closing.is_closing());
        assert!(!closing.is_acknowledgment());
        assert!(!TransportHeader::data(3, "end", 4).with_fin(true).is_closing());
    }

    #[test]
    fn test_distance_vector_rejects_out_of_range() {
        let too_costly = DistanceVectorHeader::new([(3, 16)]);
        assert!(matches!(
            too_costly.to_bytes(),
            Err(PayloadError::FieldOutOfRange { field: "cost", .. })
        ));

        let bad_destination = DistanceVectorHeader::new([(16, 1)]);
        assert!(matches!(
            bad_destination.to_bytes(),
            Err(PayloadError::FieldOutOfRange { field: "destination", .. })
        ));
    }

    #[test]
    fn test_distance_vector_rejects_empty() {
        assert_eq!(
            DistanceVectorHeader::default().to_bytes(),
            Err(PayloadError::EmptyDistanceVector)
        );
        assert_eq!(
            DistanceVectorHeader::from_bytes(&[], 0),
            Err(PayloadError::EmptyDistanceVector)
        );
    }

    #[test]
    fn test_dynamic_addressing_layout() {
        let hello = DynamicAddressingHeader {
            protocol: 0,
            conflict: true,
            sequence: 0xA5,
            address: 3,
        };
        let bytes = hello.to_bytes().unwrap();
        assert_eq!(bytes_to_bits(&bytes), "0001101001010011");
        assert_eq!(DynamicAddressingHeader::from_bytes(&bytes).unwrap(), hello);

        let parsed =
            DynamicAddressingHeader::from_bytes(&bits_to_bytes("1110000000011111").unwrap())
                .unwrap();
        assert_eq!(parsed.protocol, 7);
        assert!(!parsed.conflict);
        assert_eq!(parsed.sequence, 1);
        assert_eq!(parsed.address, 15);
    }

    #[test]
    fn test_transport_limits() {
        let too_long = TransportHeader::data(1, "x".repeat(64), 1);
        assert!(matches!(
            too_long.to_bytes(),
            Err(PayloadError::FieldOutOfRange { field: "payload length", .. })
        ));

        let bad_seq = TransportHeader::data(1 << 23, "x", 1);
        assert!(matches!(
            bad_seq.to_bytes(),
            Err(PayloadError::FieldOutOfRange { field: "sequence", .. })
        ));
    }

    #[test]
    fn test_unknown_protocol() {
        let bytes = hex::decode("1a010905ff").unwrap();
        assert_eq!(
            AddressHeader::from_bytes(&bytes),
            Err(PayloadError::UnknownProtocol(1))
        );
    }

    #[test]
    fn test_truncated_transport_payload() {
        let header = AddressHeader::transport(3, 1, 2, TransportHeader::data(9, "abcdef", 2));
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            AddressHeader::from_bytes(&bytes[..bytes.len() - 2]),
            Err(PayloadError::Truncated { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = TransportHeader::data(1, "ab", 4).to_bytes().unwrap();
        bytes[4] = 0xFF;
        assert_eq!(
            TransportHeader::from_bytes(&bytes, 4),
            Err(PayloadError::InvalidUtf8)
        );
    }

    #[test]
    fn test_header_union() {
        let h: Header = DynamicAddressingHeader {
            protocol: 0,
            conflict: false,
            sequence: 1,
            address: 4,
        }
        .into();
        assert_eq!(h.kind(), "dynamic-addressing");
        assert_eq!(h.destination(), Some(4));
        assert!(h.upper().is_none());
        assert_eq!(h.to_bytes().unwrap().len(), SHORT_FRAME_SIZE);

        let segment = TransportHeader::ack(5, false, 2);
        let h: Header = AddressHeader::transport(10, 1, 2, segment.clone()).into();
        assert_eq!(h.upper(), Some(&UpperHeader::Transport(segment)));
        assert_eq!(h.destination(), Some(2));
    }
}
