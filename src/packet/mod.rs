pub mod codec;
pub mod header;
pub mod registry;

use crate::message::RawMessage;
use crate::packet::header::{PacketHeader, PacketType};
use crate::buffers::pool::Recycle;

/// Type-specific packet content
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PacketBody {
    ConnectRequest { client_salt: u64 },
    Challenge { client_salt: u64, server_salt: u64 },
    /// `salt` is the xor of client and server salt
    ChallengeResponse { salt: u64 },
    ConnectAccept,
    Disconnect { reason: u8 },
    Keepalive,
    /// shared by all three data packet types, the header's type tag determines whether
    ///  messages carry a sequence number on the wire
    Data { channel_id: u8, messages: Vec<RawMessage> },
}

impl PacketBody {
    fn empty(packet_type: PacketType) -> PacketBody {
        match packet_type {
            PacketType::ConnectRequest => PacketBody::ConnectRequest { client_salt: 0 },
            PacketType::Challenge => PacketBody::Challenge { client_salt: 0, server_salt: 0 },
            PacketType::ChallengeResponse => PacketBody::ChallengeResponse { salt: 0 },
            PacketType::ConnectAccept => PacketBody::ConnectAccept,
            PacketType::Disconnect => PacketBody::Disconnect { reason: 0 },
            PacketType::Keepalive => PacketBody::Keepalive,
            PacketType::DataUnreliable | PacketType::DataSequenced | PacketType::DataReliable =>
                PacketBody::Data { channel_id: 0, messages: Vec::new() },
        }
    }
}

/// A packet is rented from its type's pool in
///  [PacketPool](crate::packet::registry::PacketPool), filled either by the codec or by a
///  channel, and then given back. Its type never changes while it lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(packet_type: PacketType) -> Packet {
        Packet {
            header: PacketHeader::new(packet_type),
            body: PacketBody::empty(packet_type),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn messages(&self) -> &[RawMessage] {
        match &self.body {
            PacketBody::Data { messages, .. } => messages,
            _ => &[],
        }
    }

    pub fn messages_mut(&mut self) -> Option<&mut Vec<RawMessage>> {
        match &mut self.body {
            PacketBody::Data { messages, .. } => Some(messages),
            _ => None,
        }
    }
}

impl Recycle for Packet {
    /// NB: messages must be taken out (and returned to their pool) before the packet is reset,
    ///      which [PacketPool::give_back](crate::packet::registry::PacketPool::give_back) does
    fn reset(&mut self) {
        self.header.reset();
        match &mut self.body {
            PacketBody::ConnectRequest { client_salt } => *client_salt = 0,
            PacketBody::Challenge { client_salt, server_salt } => {
                *client_salt = 0;
                *server_salt = 0;
            }
            PacketBody::ChallengeResponse { salt } => *salt = 0,
            PacketBody::ConnectAccept => {}
            PacketBody::Disconnect { reason } => *reason = 0,
            PacketBody::Keepalive => {}
            PacketBody::Data { channel_id, messages } => {
                *channel_id = 0;
                messages.clear();
            }
        }
    }
}
