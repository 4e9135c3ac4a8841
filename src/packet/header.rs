use std::fmt::{Debug, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::bits::bit_vector::BitVector;
use crate::bits::bit_reader::BitReader;
use crate::bits::bit_writer::BitWriter;
use crate::config::DeliveryMode;
use crate::error::{RudpError, RudpResult};
use crate::seq_no::SeqNo;

/// The width of the ack window that is transmitted in every packet header
pub const ACK_WINDOW_BITS: usize = 32;

/// Fixed bit pattern in system and reliable packets, used to detect corrupt or misaligned
///  packets
pub const PACKET_MARKER: u32 = 0x5EB1_7C0D;

/// Numeric type tags. The tag is the first byte on the wire and selects both the packet pool
///  and the payload layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    ConnectRequest = 1,
    Challenge = 2,
    ChallengeResponse = 3,
    ConnectAccept = 4,
    Disconnect = 5,
    Keepalive = 6,
    DataUnreliable = 7,
    DataSequenced = 8,
    DataReliable = 9,
}

impl PacketType {
    pub const ALL: [PacketType; 9] = [
        PacketType::ConnectRequest,
        PacketType::Challenge,
        PacketType::ChallengeResponse,
        PacketType::ConnectAccept,
        PacketType::Disconnect,
        PacketType::Keepalive,
        PacketType::DataUnreliable,
        PacketType::DataSequenced,
        PacketType::DataReliable,
    ];

    pub fn for_delivery_mode(mode: DeliveryMode) -> PacketType {
        match mode {
            DeliveryMode::Unreliable => PacketType::DataUnreliable,
            DeliveryMode::UnreliableSequenced => PacketType::DataSequenced,
            DeliveryMode::ReliableOrdered => PacketType::DataReliable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, PacketType::DataUnreliable | PacketType::DataSequenced | PacketType::DataReliable)
    }

    /// messages in data packets of this type carry a sequence number
    pub fn is_sequenced(&self) -> bool {
        matches!(self, PacketType::DataSequenced | PacketType::DataReliable)
    }

    /// all packets except unreliable data carry the integrity marker
    pub fn has_marker(&self) -> bool {
        !matches!(self, PacketType::DataUnreliable | PacketType::DataSequenced)
    }

    /// packets that only make sense while a connection is being established
    pub fn is_handshake(&self) -> bool {
        matches!(self, PacketType::ConnectRequest | PacketType::Challenge | PacketType::ChallengeResponse | PacketType::ConnectAccept)
    }

    /// fixed body length of system packets in bytes, `None` for data packets
    pub fn system_body_len(&self) -> Option<usize> {
        match self {
            PacketType::ConnectRequest => Some(8),
            PacketType::Challenge => Some(16),
            PacketType::ChallengeResponse => Some(8),
            PacketType::ConnectAccept => Some(0),
            PacketType::Disconnect => Some(1),
            PacketType::Keepalive => Some(0),
            PacketType::DataUnreliable | PacketType::DataSequenced | PacketType::DataReliable => None,
        }
    }

    /// the size of the largest system packet, which every configured packet size must allow for
    pub fn max_system_packet_len() -> usize {
        PacketType::ALL.iter()
            .filter_map(|t| t.system_body_len().map(|body_len| PacketHeader::serialized_len(*t) + body_len))
            .max()
            .unwrap_or(0)
    }
}

/// ```ascii
/// type:8, seq:16, ack:16, ack window:32, marker:32 (system / reliable only), pad to byte
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub seq: SeqNo,
    pub ack: SeqNo,
    pub ack_window: BitVector,
}

impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{{:?}#{} ACK {}:{:?}}}", self.packet_type, self.seq, self.ack, self.ack_window)
    }
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> PacketHeader {
        PacketHeader {
            packet_type,
            seq: SeqNo::ZERO,
            ack: SeqNo::ZERO,
            ack_window: BitVector::new(ACK_WINDOW_BITS),
        }
    }

    pub fn reset(&mut self) {
        self.seq = SeqNo::ZERO;
        self.ack = SeqNo::ZERO;
        self.ack_window.clear_all();
    }

    /// the header's length on the wire, in bytes and including padding
    pub fn serialized_len(packet_type: PacketType) -> usize {
        let marker_bits = if packet_type.has_marker() { 32 } else { 0 };

        let bits = 8                    // type
            + SeqNo::BITS               // seq
            + SeqNo::BITS               // ack
            + ACK_WINDOW_BITS
            + marker_bits;
        bits.div_ceil(8)
    }

    pub fn ser(&self, writer: &mut BitWriter) -> RudpResult<()> {
        writer.write_u8(self.packet_type.into())?;
        writer.write_u16(self.seq.to_raw())?;
        writer.write_u16(self.ack.to_raw())?;
        writer.write_bit_vector(&self.ack_window)?;
        if self.packet_type.has_marker() {
            writer.write_u32(PACKET_MARKER)?;
        }
        writer.pad_bits();
        Ok(())
    }

    /// reads a packet's type tag, which determines which pool the packet comes from
    pub fn deser_type(reader: &mut BitReader) -> RudpResult<PacketType> {
        let raw = reader.read_u8()?;
        PacketType::try_from(raw)
            .map_err(|_| RudpError::protocol(format!("unknown packet type {}", raw)))
    }

    /// reads the header fields after the type tag
    pub fn deser_fields(&mut self, reader: &mut BitReader) -> RudpResult<()> {
        self.seq = SeqNo::from_raw(reader.read_u16()?);
        self.ack = SeqNo::from_raw(reader.read_u16()?);
        self.ack_window = reader.read_bit_vector(ACK_WINDOW_BITS)?;
        if self.packet_type.has_marker() {
            let marker = reader.read_u32()?;
            if marker != PACKET_MARKER {
                return Err(RudpError::protocol(format!("corrupt or misaligned packet: marker {:08x}", marker)));
            }
        }
        reader.pad_bits();
        Ok(())
    }
}
