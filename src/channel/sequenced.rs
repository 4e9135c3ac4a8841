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

/// Unreliable, but stale messages are discarded: a message is delivered only if its sequence
///  number is newer than that of every message delivered before. This suits state updates
///  where only the most recent value matters.
pub struct SequencedChannel {
    ctx: ChannelContext,
    next_send_seq: SeqNo,
    next_packet_seq: SeqNo,
    outgoing: VecDeque<RawMessage>,
    last_delivered: Option<SeqNo>,
}

impl SequencedChannel {
    pub fn new(ctx: ChannelContext) -> SequencedChannel {
        SequencedChannel {
            ctx,
            next_send_seq: SeqNo::ZERO,
            next_packet_seq: SeqNo::ZERO,
            outgoing: VecDeque::new(),
            last_delivered: None,
        }
    }

    pub fn boxed(ctx: ChannelContext) -> Box<dyn Channel> {
        Box::new(Self::new(ctx))
    }
}

impl Channel for SequencedChannel {
    fn channel_id(&self) -> u8 {
        self.ctx.channel_id
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::UnreliableSequenced
    }

    fn send_message(&mut self, payload: Bytes) -> RudpResult<()> {
        self.ctx.check_message_len(&payload)?;
        let msg = self.ctx.new_message(self.next_send_seq, payload);
        self.next_send_seq = self.next_send_seq.next();
        self.outgoing.push_back(msg);
        Ok(())
    }

    fn receive(&mut self, packet: &Packet, delivered: &mut Vec<Bytes>) {
        for msg in packet.messages() {
            let is_newer = match self.last_delivered {
                None => true,
                Some(last) => msg.seq.is_newer_than(last),
            };

            if is_newer {
                self.last_delivered = Some(msg.seq);
                delivered.push(msg.payload.clone());
            }
            else {
                trace!("channel {}: discarding stale message #{}", self.ctx.channel_id, msg.seq);
            }
        }
    }

    fn update(&mut self, _now: Instant) -> Option<Packet> {
        let packet = self.ctx.drain_into_packet(PacketType::DataSequenced, self.next_packet_seq, &mut self.outgoing)?;
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
