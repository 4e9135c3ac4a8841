use std::collections::VecDeque;
use std::time::Instant;
use bytes::Bytes;
use tracing::trace;
use crate::channel::{Channel, ChannelContext};
use crate::config::DeliveryMode;
use crate::error::RudpResult;
use crate::message::RawMessage;
use crate::packet::header::PacketType;
use crate::packet::Packet;
use crate::seq_no::SeqNo;

/// Fire and forget: messages are sent once, in the order they were queued, and delivered in
///  whatever order (and however often) they arrive.
pub struct UnreliableChannel {
    ctx: ChannelContext,
    next_packet_seq: SeqNo,
    outgoing: VecDeque<RawMessage>,
}

impl UnreliableChannel {
    pub fn new(ctx: ChannelContext) -> UnreliableChannel {
        UnreliableChannel {
            ctx,
            next_packet_seq: SeqNo::ZERO,
            outgoing: VecDeque::new(),
        }
    }

    pub fn boxed(ctx: ChannelContext) -> Box<dyn Channel> {
        Box::new(Self::new(ctx))
    }
}

impl Channel for UnreliableChannel {
    fn channel_id(&self) -> u8 {
        self.ctx.channel_id
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Unreliable
    }

    fn send_message(&mut self, payload: Bytes) -> RudpResult<()> {
        self.ctx.check_message_len(&payload)?;
        self.outgoing.push_back(self.ctx.new_message(SeqNo::ZERO, payload));
        Ok(())
    }

    fn receive(&mut self, packet: &Packet, delivered: &mut Vec<Bytes>) {
        trace!("channel {}: received {} unreliable messages", self.ctx.channel_id, packet.messages().len());
        delivered.extend(packet.messages().iter().map(|m| m.payload.clone()));
    }

    fn update(&mut self, _now: Instant) -> Option<Packet> {
        let packet = self.ctx.drain_into_packet(PacketType::DataUnreliable, self.next_packet_seq, &mut self.outgoing)?;
        self.next_packet_seq = self.next_packet_seq.next();
        Some(packet)
    }

    fn num_pending(&self) -> usize {
        self.outgoing.len()
    }

    fn release(&mut self) {
        self.ctx.release_all(&mut self.outgoing);
    }
}
