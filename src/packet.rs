use std::time::Instant;

/// Total bytes on the wire, header included.
pub const MAX_PACKET_SIZE: usize = 1024;
/// `seq(4) + ack(4) + type(4) + window(2)`.
pub const HEADER_SIZE: usize = 14;
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data,
    Ack,
    Syn,
    Fin,
}

impl PacketType {
    fn to_u32(self) -> u32 {
        match self {
            PacketType::Data => 0,
            PacketType::Ack => 1,
            PacketType::Syn => 2,
            PacketType::Fin => 3,
        }
    }

    fn from_u32(v: u32) -> Option<PacketType> {
        match v {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Ack),
            2 => Some(PacketType::Syn),
            3 => Some(PacketType::Fin),
            _ => None,
        }
    }
}

/// A single transport segment. `timestamp` is local-only bookkeeping (send or
/// receive time) and never crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq_num: u32,
    pub ack_num: u32,
    pub kind: PacketType,
    pub window: u16,
    pub payload: Vec<u8>,
    pub timestamp: Option<Instant>,
}

impl Packet {
    pub fn new(seq_num: u32, ack_num: u32, kind: PacketType, window: u16, payload: Vec<u8>) -> Self {
        Packet {
            seq_num,
            ack_num,
            kind,
            window,
            payload,
            timestamp: None,
        }
    }

    /// Encoding is total: it never fails.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.ack_num.to_be_bytes());
        buf.extend_from_slice(&self.kind.to_u32().to_be_bytes());
        buf.extend_from_slice(&self.window.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Rejects datagrams shorter than the header or carrying an unknown type
    /// tag. The returned packet's timestamp is the decode-time wall clock.
    pub fn from_bytes(data: &[u8]) -> Option<Packet> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        let seq_num = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let ack_num = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let type_tag = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let window = u16::from_be_bytes(data[12..14].try_into().unwrap());
        let kind = PacketType::from_u32(type_tag)?;
        let payload = data[HEADER_SIZE..].to_vec();

        Some(Packet {
            seq_num,
            ack_num,
            kind,
            window,
            payload,
            timestamp: Some(Instant::now()),
        })
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet(seq={}, ack={}, kind={:?}, window={}, payload_size={})",
            self.seq_num,
            self.ack_num,
            self.kind,
            self.window,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_wire_fields() {
        let p = Packet::new(42, 7, PacketType::Data, 64, vec![1, 2, 3, 4]);
        let bytes = p.to_bytes();
        let decoded = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.seq_num, p.seq_num);
        assert_eq!(decoded.ack_num, p.ack_num);
        assert_eq!(decoded.kind, p.kind);
        assert_eq!(decoded.window, p.window);
        assert_eq!(decoded.payload, p.payload);
    }

    #[test]
    fn round_trip_empty_payload() {
        let p = Packet::new(0, 0, PacketType::Syn, 1, vec![]);
        let decoded = Packet::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(decoded, Packet { timestamp: decoded.timestamp, ..p });
    }

    #[test]
    fn rejects_short_datagram() {
        let short = vec![0u8; HEADER_SIZE - 1];
        assert!(Packet::from_bytes(&short).is_none());
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[8..12].copy_from_slice(&99u32.to_be_bytes());
        assert!(Packet::from_bytes(&buf).is_none());
    }

    #[test]
    fn header_and_payload_bounds_match_spec() {
        assert_eq!(HEADER_SIZE, 14);
        assert_eq!(MAX_PACKET_SIZE, 1024);
        assert_eq!(MAX_PAYLOAD_SIZE, 1010);
    }

    #[test]
    fn encoding_is_big_endian() {
        let p = Packet::new(0x01020304, 0, PacketType::Data, 0, vec![]);
        let bytes = p.to_bytes();
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
    }
}
