pub mod reliable_ordered;
pub mod sequenced;
pub mod unreliable;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use crate::config::{DeliveryMode, RudpConfig};
use crate::error::{RudpError, RudpResult};
use crate::message::RawMessage;
use crate::packet::header::{PacketHeader, PacketType};
use crate::packet::registry::PacketPool;
use crate::packet::{Packet, PacketBody};
use crate::seq_no::SeqNo;

/// One logical stream inside a connection, implementing a single delivery guarantee on top of
///  unreliable, unordered packets.
///
/// A channel is driven by its connection's update tick and is never shared between threads.
pub trait Channel: Send {
    fn channel_id(&self) -> u8;

    fn delivery_mode(&self) -> DeliveryMode;

    /// Queues an application message. Messages that do not fit into a single packet are
    ///  rejected with a configuration error since there is no fragmentation.
    fn send_message(&mut self, payload: Bytes) -> RudpResult<()>;

    /// Handles a received data packet of this channel, appending payloads that are ready for
    ///  the application to `delivered`. The caller keeps ownership of the packet.
    fn receive(&mut self, packet: &Packet, delivered: &mut Vec<Bytes>);

    /// Assembles at most one outgoing packet
    fn update(&mut self, now: Instant) -> Option<Packet>;

    /// number of messages that are queued or awaiting acknowledgement
    fn num_pending(&self) -> usize;

    /// Returns all pooled objects the channel holds. The channel must not be used afterwards.
    fn release(&mut self);
}

pub type ChannelFactory = fn(ChannelContext) -> Box<dyn Channel>;

impl DeliveryMode {
    pub fn channel_factory(self) -> ChannelFactory {
        match self {
            DeliveryMode::Unreliable => unreliable::UnreliableChannel::boxed,
            DeliveryMode::UnreliableSequenced => sequenced::SequencedChannel::boxed,
            DeliveryMode::ReliableOrdered => reliable_ordered::ReliableOrderedChannel::boxed,
        }
    }
}

/// Everything a channel needs from its connection
#[derive(Clone)]
pub struct ChannelContext {
    pub channel_id: u8,
    pub packet_pool: Arc<PacketPool>,
    pub max_packet_size: usize,
    pub max_message_len: usize,
    pub retransmit_interval: Duration,
}

impl ChannelContext {
    pub fn new(channel_id: u8, mode: DeliveryMode, config: &RudpConfig, packet_pool: Arc<PacketPool>) -> ChannelContext {
        ChannelContext {
            channel_id,
            packet_pool,
            max_packet_size: config.max_packet_size,
            max_message_len: config.max_message_len(mode),
            retransmit_interval: config.retransmit_interval,
        }
    }

    fn check_message_len(&self, payload: &Bytes) -> RudpResult<()> {
        if payload.len() > self.max_message_len {
            return Err(RudpError::configuration(format!(
                "message of {} bytes exceeds the maximum of {} bytes on channel {} - fragmentation is not supported",
                payload.len(), self.max_message_len, self.channel_id)));
        }
        Ok(())
    }

    fn new_message(&self, seq: SeqNo, payload: Bytes) -> RawMessage {
        let mut msg = self.packet_pool.message_pool().rent();
        msg.seq = seq;
        msg.payload = payload;
        msg
    }

    fn rent_data_packet(&self, packet_type: PacketType, packet_seq: SeqNo) -> Packet {
        let mut packet = self.packet_pool.rent(packet_type);
        packet.header.seq = packet_seq;
        if let PacketBody::Data { channel_id, .. } = &mut packet.body {
            *channel_id = self.channel_id;
        }
        packet
    }

    /// the number of bytes available for messages in a packet of the given type
    fn message_budget(&self, packet_type: PacketType) -> usize {
        self.max_packet_size
            .saturating_sub(PacketHeader::serialized_len(packet_type))
            .saturating_sub(2) // channel id, message count
    }

    /// Moves messages from the front of a send queue into a new packet, as long as they fit.
    ///  Messages that do not fit stay queued for the next tick.
    fn drain_into_packet(&self, packet_type: PacketType, packet_seq: SeqNo, queue: &mut VecDeque<RawMessage>) -> Option<Packet> {
        if queue.is_empty() {
            return None;
        }

        let mut packet = self.rent_data_packet(packet_type, packet_seq);
        let mut remaining = self.message_budget(packet_type);
        if let Some(messages) = packet.messages_mut() {
            while let Some(msg) = queue.front() {
                let len = msg.wire_len(packet_type.is_sequenced());
                if len > remaining || messages.len() == MAX_MESSAGES_PER_PACKET {
                    break;
                }
                remaining -= len;
                if let Some(msg) = queue.pop_front() {
                    messages.push(msg);
                }
            }
        }
        Some(packet)
    }

    fn release_all(&self, queue: &mut VecDeque<RawMessage>) {
        for msg in queue.drain(..) {
            self.packet_pool.message_pool().give_back(msg);
        }
    }
}

/// limited by the 8 bit message count on the wire
pub const MAX_MESSAGES_PER_PACKET: usize = u8::MAX as usize;
