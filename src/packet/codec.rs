use std::sync::Arc;
use tracing::trace;
use crate::bits::bit_reader::BitReader;
use crate::bits::bit_writer::BitWriter;
use crate::config::RudpConfig;
use crate::error::{RudpError, RudpResult};
use crate::packet::header::PacketHeader;
use crate::message::new_message_pool;
use crate::packet::registry::{PacketPool, PacketRegistry};
use crate::packet::{Packet, PacketBody};
use crate::safe_converter::SafeCast;
use crate::seq_no::SeqNo;

/// Serializes packets into a [BitWriter] and parses received datagrams into pooled packets.
///
/// ```ascii
/// header (see PacketHeader), then type specific payload:
///  ConnectRequest:     client salt:64
///  Challenge:          client salt:64, server salt:64
///  ChallengeResponse:  salt:64
///  Disconnect:         reason:8
///  data packets:       channel:8, count:8, count * ([seq:16] len:16, payload:len*8)
/// ```
///
/// Messages carry a sequence number for sequenced and reliable data packets only.
pub struct PacketCodec {
    pool: Arc<PacketPool>,
}

impl PacketCodec {
    pub fn new(pool: Arc<PacketPool>) -> PacketCodec {
        PacketCodec {
            pool,
        }
    }

    /// a codec with its own packet and message pools, sized as configured
    pub fn from_config(config: &RudpConfig) -> PacketCodec {
        let message_pool = Arc::new(new_message_pool(config.message_pool_size));
        let packet_pool = PacketPool::new(&PacketRegistry::standard(), config.packet_pool_size, message_pool);
        PacketCodec::new(Arc::new(packet_pool))
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    /// Writes the packet to a cleared writer; the datagram is then `writer.get_bytes()`
    pub fn serialize(&self, packet: &Packet, writer: &mut BitWriter) -> RudpResult<()> {
        writer.clear();
        packet.header.ser(writer)?;

        match &packet.body {
            PacketBody::ConnectRequest { client_salt } => writer.write_u64(*client_salt)?,
            PacketBody::Challenge { client_salt, server_salt } => {
                writer.write_u64(*client_salt)?;
                writer.write_u64(*server_salt)?;
            }
            PacketBody::ChallengeResponse { salt } => writer.write_u64(*salt)?,
            PacketBody::ConnectAccept => {}
            PacketBody::Disconnect { reason } => writer.write_u8(*reason)?,
            PacketBody::Keepalive => {}
            PacketBody::Data { channel_id, messages } => {
                let count: u8 = messages.len().try_into()
                    .map_err(|_| RudpError::protocol(format!("too many messages for a single packet: {}", messages.len())))?;

                writer.write_u8(*channel_id)?;
                writer.write_u8(count)?;

                let sequenced = packet.packet_type().is_sequenced();
                for msg in messages {
                    if sequenced {
                        writer.write_u16(msg.seq.to_raw())?;
                    }
                    let len: u16 = msg.payload.len().try_into()
                        .map_err(|_| RudpError::protocol(format!("message payload too long: {}", msg.payload.len())))?;
                    writer.write_u16(len)?;
                    writer.write_bytes(&msg.payload)?;
                }
            }
        }
        Ok(())
    }

    /// Parses a datagram into a packet rented from the pool for its type tag. Any failure is
    ///  reported as a protocol error, and the partially filled packet goes back to its pool.
    pub fn deserialize(&self, buf: &[u8]) -> RudpResult<Packet> {
        let mut reader = BitReader::new(buf);
        let packet_type = PacketHeader::deser_type(&mut reader)
            .map_err(Self::as_protocol_error)?;

        let mut packet = self.pool.rent(packet_type);
        match self.deser_into(&mut reader, &mut packet) {
            Ok(()) => {
                if reader.is_at_end() {
                    trace!("deserialized {:?}", packet.header);
                    Ok(packet)
                }
                else {
                    self.pool.give_back(packet);
                    Err(RudpError::protocol(format!("{} trailing bits after {:?} packet", reader.remaining_bits(), packet_type)))
                }
            }
            Err(e) => {
                self.pool.give_back(packet);
                Err(Self::as_protocol_error(e))
            }
        }
    }

    fn as_protocol_error(e: RudpError) -> RudpError {
        match e {
            RudpError::Format { requested_bits, available_bits } =>
                RudpError::protocol(format!("truncated packet: {} bits requested, {} available", requested_bits, available_bits)),
            e => e,
        }
    }

    fn deser_into(&self, reader: &mut BitReader, packet: &mut Packet) -> RudpResult<()> {
        packet.header.deser_fields(reader)?;
        let sequenced = packet.packet_type().is_sequenced();

        match &mut packet.body {
            PacketBody::ConnectRequest { client_salt } => *client_salt = reader.read_u64()?,
            PacketBody::Challenge { client_salt, server_salt } => {
                *client_salt = reader.read_u64()?;
                *server_salt = reader.read_u64()?;
            }
            PacketBody::ChallengeResponse { salt } => *salt = reader.read_u64()?,
            PacketBody::ConnectAccept => {}
            PacketBody::Disconnect { reason } => *reason = reader.read_u8()?,
            PacketBody::Keepalive => {}
            PacketBody::Data { channel_id, messages } => {
                *channel_id = reader.read_u8()?;
                let count = reader.read_u8()?;

                for _ in 0..count {
                    // the message is owned by the packet right away so that it is released
                    //  with the packet if parsing fails
                    messages.push(self.pool.message_pool().rent());
                    if let Some(msg) = messages.last_mut() {
                        if sequenced {
                            msg.seq = SeqNo::from_raw(reader.read_u16()?);
                        }
                        let len = reader.read_u16()?;
                        msg.payload = reader.read_bytes(len.safe_cast())?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;
    use crate::message::RawMessage;
    use crate::packet::header::PacketType;

    fn new_codec() -> PacketCodec {
        let message_pool = Arc::new(new_message_pool(64));
        PacketCodec::new(Arc::new(PacketPool::new(&PacketRegistry::standard(), 16, message_pool)))
    }

    fn data_packet(packet_type: PacketType, payloads: &[&'static [u8]]) -> Packet {
        let mut packet = Packet::new(packet_type);
        packet.header.seq = SeqNo::from_raw(77);
        packet.header.ack = SeqNo::from_raw(65530);
        packet.header.ack_window.set(0);
        packet.header.ack_window.set(31);

        let messages = payloads.iter()
            .enumerate()
            .map(|(i, &p)| RawMessage {
                seq: if packet_type.is_sequenced() { SeqNo::from_raw(65534).plus(i as u16) } else { SeqNo::ZERO },
                payload: Bytes::from_static(p),
                last_sent: None,
            })
            .collect();
        packet.body = PacketBody::Data { channel_id: 3, messages };
        packet
    }

    fn system_packet(body: PacketBody, packet_type: PacketType) -> Packet {
        let mut packet = Packet::new(packet_type);
        packet.header.seq = SeqNo::from_raw(5);
        packet.body = body;
        packet
    }

    #[rstest]
    #[case::connect_request(system_packet(PacketBody::ConnectRequest { client_salt: 0x0123_4567_89ab_cdef }, PacketType::ConnectRequest))]
    #[case::challenge(system_packet(PacketBody::Challenge { client_salt: 1, server_salt: u64::MAX }, PacketType::Challenge))]
    #[case::challenge_response(system_packet(PacketBody::ChallengeResponse { salt: 99 }, PacketType::ChallengeResponse))]
    #[case::connect_accept(system_packet(PacketBody::ConnectAccept, PacketType::ConnectAccept))]
    #[case::disconnect(system_packet(PacketBody::Disconnect { reason: 3 }, PacketType::Disconnect))]
    #[case::keepalive(system_packet(PacketBody::Keepalive, PacketType::Keepalive))]
    #[case::unreliable(data_packet(PacketType::DataUnreliable, &[b"abc", b"", b"de"]))]
    #[case::sequenced(data_packet(PacketType::DataSequenced, &[b"x"]))]
    #[case::reliable(data_packet(PacketType::DataReliable, &[b"hello", b"world", b"", b"!"]))]
    #[case::reliable_empty(data_packet(PacketType::DataReliable, &[]))]
    fn test_round_trip(#[case] packet: Packet) {
        let codec = new_codec();
        let mut writer = BitWriter::new(1500);
        codec.serialize(&packet, &mut writer).unwrap();

        let deser = codec.deserialize(writer.get_bytes()).unwrap();
        assert_eq!(deser, packet);
    }

    #[rstest]
    #[case::connect_request(system_packet(PacketBody::ConnectRequest { client_salt: 1 }, PacketType::ConnectRequest))]
    #[case::challenge(system_packet(PacketBody::Challenge { client_salt: 1, server_salt: 2 }, PacketType::Challenge))]
    #[case::challenge_response(system_packet(PacketBody::ChallengeResponse { salt: 3 }, PacketType::ChallengeResponse))]
    #[case::connect_accept(system_packet(PacketBody::ConnectAccept, PacketType::ConnectAccept))]
    #[case::disconnect(system_packet(PacketBody::Disconnect { reason: 3 }, PacketType::Disconnect))]
    #[case::keepalive(system_packet(PacketBody::Keepalive, PacketType::Keepalive))]
    fn test_system_packet_len(#[case] packet: Packet) {
        let mut writer = BitWriter::new(1500);
        new_codec().serialize(&packet, &mut writer).unwrap();

        let packet_type = packet.packet_type();
        let expected = PacketHeader::serialized_len(packet_type) + packet_type.system_body_len().unwrap();
        assert_eq!(writer.get_bytes().len(), expected);
        assert!(expected <= PacketType::max_system_packet_len());
    }

    #[test]
    fn test_challenge_fits_smallest_packet_size() {
        assert_eq!(PacketType::max_system_packet_len(), 29);

        let packet = system_packet(PacketBody::Challenge { client_salt: u64::MAX, server_salt: u64::MAX }, PacketType::Challenge);
        let mut writer = BitWriter::new(PacketType::max_system_packet_len());
        new_codec().serialize(&packet, &mut writer).unwrap();
    }

    #[rstest]
    #[case::keepalive(system_packet(PacketBody::Keepalive, PacketType::Keepalive))]
    #[case::reliable(data_packet(PacketType::DataReliable, &[b"hello"]))]
    fn test_corrupt_marker(#[case] packet: Packet, #[values(0, 5, 31)] bit: usize) {
        let codec = new_codec();
        let mut writer = BitWriter::new(1500);
        codec.serialize(&packet, &mut writer).unwrap();

        // the marker starts right after type, seq, ack and the ack window
        let marker_offset = (8 + 16 + 16 + 32) / 8;
        let mut buf = writer.get_bytes().to_vec();
        buf[marker_offset + bit / 8] ^= 1 << (bit % 8);

        match codec.deserialize(&buf) {
            Err(RudpError::Protocol(msg)) => assert!(msg.contains("marker"), "{}", msg),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[rstest]
    #[case::challenge(system_packet(PacketBody::Challenge { client_salt: 1, server_salt: 2 }, PacketType::Challenge))]
    #[case::keepalive(system_packet(PacketBody::Keepalive, PacketType::Keepalive))]
    #[case::unreliable(data_packet(PacketType::DataUnreliable, &[b"abc"]))]
    #[case::reliable(data_packet(PacketType::DataReliable, &[b"hello", b"world"]))]
    fn test_truncated(#[case] packet: Packet) {
        let codec = new_codec();
        let mut writer = BitWriter::new(1500);
        codec.serialize(&packet, &mut writer).unwrap();

        let buf = writer.get_bytes();
        match codec.deserialize(&buf[..buf.len() - 1]) {
            Err(RudpError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[rstest]
    #[case::connect_accept(system_packet(PacketBody::ConnectAccept, PacketType::ConnectAccept))]
    #[case::sequenced(data_packet(PacketType::DataSequenced, &[b"abc"]))]
    fn test_trailing_bytes(#[case] packet: Packet) {
        let codec = new_codec();
        let mut writer = BitWriter::new(1500);
        codec.serialize(&packet, &mut writer).unwrap();

        let mut buf = writer.get_bytes().to_vec();
        buf.push(0);
        match codec.deserialize(&buf) {
            Err(RudpError::Protocol(msg)) => assert!(msg.contains("trailing"), "{}", msg),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_tag(vec![42, 0, 0, 0, 0, 0, 0, 0, 0])]
    fn test_invalid_datagram(#[case] buf: Vec<u8>) {
        match new_codec().deserialize(&buf) {
            Err(RudpError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_parse_releases_messages() {
        let codec = new_codec();
        let mut writer = BitWriter::new(1500);
        codec.serialize(&data_packet(PacketType::DataReliable, &[b"hello", b"world"]), &mut writer).unwrap();

        let buf = writer.get_bytes();
        assert!(codec.deserialize(&buf[..buf.len() - 2]).is_err());

        assert_eq!(codec.pool().message_pool().available(), 2);
        assert_eq!(codec.pool().available(PacketType::DataReliable), 1);
    }

    #[test]
    fn test_too_many_messages() {
        let payloads = [b"" as &'static [u8]; 256];
        let packet = data_packet(PacketType::DataUnreliable, &payloads);
        let mut writer = BitWriter::new(1500);
        assert!(matches!(new_codec().serialize(&packet, &mut writer), Err(RudpError::Protocol(_))));
    }

    #[test]
    fn test_capacity() {
        let packet = data_packet(PacketType::DataReliable, &[&[0u8; 100]]);
        let mut writer = BitWriter::new(50);
        assert!(matches!(new_codec().serialize(&packet, &mut writer), Err(RudpError::Capacity { .. })));
    }
}
