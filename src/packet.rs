//! Wire records: the fixed 8-byte on-air `Header`, the `ExtendedHeader`
//! carried in the payload, and the in-memory `Packet` passed between the
//! network queue, send/recv windows, and the PHY.
//!
//! Layouts are verbatim from `spec.md` §6.

use crate::neighborhood::NodeId;
use crate::error::WireError;

bitflags::bitflags! {
    /// Header flags byte (bit 0 = ACK, bit 1 = NAK, bit 2 = BROADCAST).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const ACK       = 0b0000_0001;
        const NAK       = 0b0000_0010;
        const BROADCAST = 0b0000_0100;
    }
}

/// Modular sequence number ordering packets within one (source, dest) flow.
///
/// Comparisons are modulo the window capacity the caller supplies; `Seq`
/// itself just wraps a `u16` and provides wrapping arithmetic. The wire
/// representation is a 16-bit big-endian field in [`ExtendedHeader`] and the
/// packet-id field of [`Header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seq(pub u16);

impl Seq {
    pub const ZERO: Seq = Seq(0);

    pub fn next(self) -> Seq {
        Seq(self.0.wrapping_add(1))
    }

    pub fn add(self, n: u16) -> Seq {
        Seq(self.0.wrapping_add(n))
    }

    /// `self - other`, as a signed distance accounting for u16 wraparound.
    pub fn distance_from(self, other: Seq) -> i32 {
        self.0.wrapping_sub(other.0) as i16 as i32
    }

    /// True if `self` comes strictly before `other` in sequence order.
    pub fn precedes(self, other: Seq) -> bool {
        self.distance_from(other) < 0
    }
}

impl std::ops::Add<u16> for Seq {
    type Output = Seq;
    fn add(self, rhs: u16) -> Seq {
        self.add(rhs)
    }
}

/// Fixed-size on-air header, separately FEC-protected by the PHY.
///
/// Byte layout (`spec.md` §6):
/// `[dst, src, packet_id_hi, packet_id_lo, flags, 0, 0, 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub dst: NodeId,
    pub src: NodeId,
    pub packet_id: u16,
    pub flags: PacketFlags,
}

pub const HEADER_LEN: usize = 8;

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let [hi, lo] = self.packet_id.to_be_bytes();
        [self.dst.0, self.src.0, hi, lo, self.flags.bits(), 0, 0, 0]
    }

    pub fn decode(buf: &[u8]) -> Result<Header, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::HeaderTooShort(buf.len()));
        }
        Ok(Header {
            dst: NodeId(buf[0]),
            src: NodeId(buf[1]),
            packet_id: u16::from_be_bytes([buf[2], buf[3]]),
            flags: PacketFlags::from_bits_truncate(buf[4]),
        })
    }
}

/// Echoed ACK sequence and source/destination addressing carried at the
/// front of the payload, ahead of the IP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedHeader {
    pub ack: Seq,
    pub src: NodeId,
    pub dst: NodeId,
}

impl ExtendedHeader {
    /// Wire size: 2-byte ack sequence (BE) + 1-byte src + 1-byte dst.
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let [hi, lo] = self.ack.0.to_be_bytes();
        [hi, lo, self.src.0, self.dst.0]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::PayloadTooShort {
                declared: Self::LEN,
                actual: buf.len(),
            });
        }
        Ok(Self {
            ack: Seq(u16::from_be_bytes([buf[0], buf[1]])),
            src: NodeId(buf[2]),
            dst: NodeId(buf[3]),
        })
    }
}

/// Encode the wire payload: declared length, extended header, reserved
/// padding, then the IP datagram (`spec.md` §6).
pub fn encode_wire_payload(ehdr: &ExtendedHeader, padded_bytes: usize, datagram: &[u8]) -> Vec<u8> {
    let declared = datagram.len() as u16;
    let mut out = Vec::with_capacity(2 + ExtendedHeader::LEN + padded_bytes + datagram.len());
    out.extend_from_slice(&declared.to_be_bytes());
    out.extend_from_slice(&ehdr.encode());
    out.resize(out.len() + padded_bytes, 0);
    out.extend_from_slice(datagram);
    out
}

/// Decode a wire payload, returning the declared length, the extended
/// header, and a slice over the IP datagram.
pub fn decode_wire_payload(buf: &[u8], padded_bytes: usize) -> Result<(u16, ExtendedHeader, &[u8]), WireError> {
    let prefix = 2 + ExtendedHeader::LEN + padded_bytes;
    if buf.len() < prefix {
        return Err(WireError::PayloadTooShort {
            declared: prefix,
            actual: buf.len(),
        });
    }
    let declared = u16::from_be_bytes([buf[0], buf[1]]);
    let ehdr = ExtendedHeader::decode(&buf[2..2 + ExtendedHeader::LEN])?;
    let data_start = prefix;
    let data_end = data_start + declared as usize;
    if buf.len() < data_end {
        return Err(WireError::PayloadTooShort {
            declared: declared as usize,
            actual: buf.len().saturating_sub(data_start),
        });
    }
    Ok((declared, ehdr, &buf[data_start..data_end]))
}

/// An in-flight packet, owned by exactly one container at a time (network
/// queue, send-window slot, demodulator scratch, or egress sink).
#[derive(Debug, Clone)]
pub struct Packet {
    pub nexthop: NodeId,
    pub curhop: NodeId,
    pub seq: Seq,
    pub flags: PacketFlags,
    pub mcsidx: u8,
    pub gain: f32,
    pub ehdr: ExtendedHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A pure control packet (e.g. a synthesized ACK) carries no data.
    pub fn is_control(&self) -> bool {
        self.payload.is_empty()
    }

    /// The on-air header for this packet. `packet_id` doubles as the ARQ
    /// sequence number — a single 16-bit field, not two redundant ones.
    pub fn header(&self) -> Header {
        Header {
            dst: self.nexthop,
            src: self.curhop,
            packet_id: self.seq.0,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            dst: NodeId(3),
            src: NodeId(7),
            packet_id: 0xBEEF,
            flags: PacketFlags::ACK | PacketFlags::BROADCAST,
        };
        let bytes = h.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn header_decode_rejects_short_buffer() {
        let err = Header::decode(&[1, 2, 3]).unwrap_err();
        matches!(err, WireError::HeaderTooShort(3));
    }

    #[test]
    fn seq_wraps_and_compares_modulo() {
        let a = Seq(65535);
        let b = a.next();
        assert_eq!(b, Seq(0));
        assert!(a.precedes(b));
        assert!(!b.precedes(a));
    }

    #[test]
    fn seq_distance_handles_wraparound() {
        let a = Seq(0);
        let b = Seq(65535);
        assert_eq!(b.distance_from(a), -1);
        assert_eq!(a.distance_from(b), 1);
    }

    #[test]
    fn wire_payload_round_trips_with_datagram() {
        let ehdr = ExtendedHeader {
            ack: Seq(42),
            src: NodeId(1),
            dst: NodeId(2),
        };
        let datagram = b"hello ip datagram";
        let wire = encode_wire_payload(&ehdr, 8, datagram);
        let (declared, decoded_ehdr, data) = decode_wire_payload(&wire, 8).unwrap();
        assert_eq!(declared as usize, datagram.len());
        assert_eq!(decoded_ehdr, ehdr);
        assert_eq!(data, datagram);
    }

    #[test]
    fn wire_payload_round_trips_zero_length_ack() {
        let ehdr = ExtendedHeader {
            ack: Seq(7),
            src: NodeId(3),
            dst: NodeId(4),
        };
        let wire = encode_wire_payload(&ehdr, 8, &[]);
        let (declared, decoded_ehdr, data) = decode_wire_payload(&wire, 8).unwrap();
        assert_eq!(declared, 0);
        assert_eq!(decoded_ehdr, ehdr);
        assert!(data.is_empty());
    }

    #[test]
    fn decode_wire_payload_rejects_short_buffer() {
        let err = decode_wire_payload(&[0, 0], 8).unwrap_err();
        matches!(err, WireError::PayloadTooShort { .. });
    }
}
