use std::collections::VecDeque;
use std::time::Instant;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};
use crate::ack_window::AckWindow;
use crate::channel::{Channel, ChannelContext, MAX_MESSAGES_PER_PACKET};
use crate::config::DeliveryMode;
use crate::error::RudpResult;
use crate::message::RawMessage;
use crate::packet::header::{PacketType, ACK_WINDOW_BITS};
use crate::packet::Packet;
use crate::seq_no::SeqNo;

/// Every message is delivered to the application exactly once, in the order it was sent.
///
/// Sender side: each message gets a sequence number and stays in `pending` until the partner's
///  `(ack, ack window)` shows it was received. Messages that were not acknowledged within the
///  retransmit interval are sent again, unchanged and without a retry limit. Only messages
///  within [ACK_WINDOW_BITS] of the oldest unacknowledged message are put on the wire, so that
///  every message in flight can be represented in the partner's ack window.
///
/// Receiver side: every received sequence number goes into the ack window, which is sent back
///  in the header of the next outgoing packet. Messages that arrive ahead of a gap wait in a
///  reorder buffer until the gap is filled, and duplicates are discarded.
pub struct ReliableOrderedChannel {
    ctx: ChannelContext,
    next_packet_seq: SeqNo,

    next_send_seq: SeqNo,
    pending: VecDeque<RawMessage>,

    receive_window: AckWindow,
    next_expected: SeqNo,
    reorder_buffer: FxHashMap<SeqNo, Bytes>,
    /// data was received since the last outgoing packet, so the partner is waiting for an ack
    ack_pending: bool,
}

impl ReliableOrderedChannel {
    pub fn new(ctx: ChannelContext) -> ReliableOrderedChannel {
        ReliableOrderedChannel {
            ctx,
            next_packet_seq: SeqNo::ZERO,
            next_send_seq: SeqNo::ZERO,
            pending: VecDeque::new(),
            receive_window: AckWindow::starting_at(ACK_WINDOW_BITS, SeqNo::ZERO.prev()),
            next_expected: SeqNo::ZERO,
            reorder_buffer: FxHashMap::default(),
            ack_pending: false,
        }
    }

    pub fn boxed(ctx: ChannelContext) -> Box<dyn Channel> {
        Box::new(Self::new(ctx))
    }

    fn is_in_send_window(oldest_pending: SeqNo, seq: SeqNo) -> bool {
        let diff = seq.difference(oldest_pending);
        diff >= 0 && (diff as usize) < ACK_WINDOW_BITS
    }

    fn on_ack(&mut self, packet: &Packet) {
        let ack = packet.header.ack;
        let bits = &packet.header.ack_window;

        let before = self.pending.len();
        let mut still_pending = VecDeque::with_capacity(before);
        for msg in self.pending.drain(..) {
            if AckWindow::acknowledges(ack, bits, msg.seq) {
                self.ctx.packet_pool.message_pool().give_back(msg);
            }
            else {
                still_pending.push_back(msg);
            }
        }
        self.pending = still_pending;

        if self.pending.len() != before {
            trace!("channel {}: {} messages acknowledged, {} pending", self.ctx.channel_id, before - self.pending.len(), self.pending.len());
        }
    }

    fn on_message(&mut self, msg: &RawMessage, delivered: &mut Vec<Bytes>) {
        let diff = msg.seq.difference(self.next_expected);

        if diff < 0 {
            trace!("channel {}: discarding duplicate message #{}", self.ctx.channel_id, msg.seq);
            // the ack for this message may have been lost, so it is acknowledged again
            self.receive_window.ack_receive(msg.seq);
            return;
        }
        if diff as usize >= ACK_WINDOW_BITS {
            warn!("channel {}: message #{} is too far ahead of expected #{} - discarding", self.ctx.channel_id, msg.seq, self.next_expected);
            return;
        }

        self.receive_window.ack_receive(msg.seq);

        if diff > 0 {
            if self.reorder_buffer.insert(msg.seq, msg.payload.clone()).is_some() {
                trace!("channel {}: duplicate of buffered message #{}", self.ctx.channel_id, msg.seq);
            }
            return;
        }

        delivered.push(msg.payload.clone());
        self.next_expected = self.next_expected.next();
        while let Some(payload) = self.reorder_buffer.remove(&self.next_expected) {
            delivered.push(payload);
            self.next_expected = self.next_expected.next();
        }
    }
}

impl Channel for ReliableOrderedChannel {
    fn channel_id(&self) -> u8 {
        self.ctx.channel_id
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::ReliableOrdered
    }

    fn send_message(&mut self, payload: Bytes) -> RudpResult<()> {
        self.ctx.check_message_len(&payload)?;
        let msg = self.ctx.new_message(self.next_send_seq, payload);
        self.next_send_seq = self.next_send_seq.next();
        self.pending.push_back(msg);
        Ok(())
    }

    fn receive(&mut self, packet: &Packet, delivered: &mut Vec<Bytes>) {
        self.on_ack(packet);

        for msg in packet.messages() {
            self.ack_pending = true;
            self.on_message(msg, delivered);
        }
    }

    fn update(&mut self, now: Instant) -> Option<Packet> {
        let retransmit_interval = self.ctx.retransmit_interval;
        let oldest = self.pending.front().map(|m| m.seq).unwrap_or(self.next_send_seq);
        let has_due = self.pending.iter()
            .take_while(|m| Self::is_in_send_window(oldest, m.seq))
            .any(|m| m.is_due(now, retransmit_interval));
        if !has_due && !self.ack_pending {
            return None;
        }

        let mut packet = self.ctx.rent_data_packet(PacketType::DataReliable, self.next_packet_seq);
        self.next_packet_seq = self.next_packet_seq.next();
        packet.header.ack = self.receive_window.ack();
        packet.header.ack_window.clone_from(self.receive_window.bits());

        let mut remaining = self.ctx.message_budget(PacketType::DataReliable);
        if let Some(messages) = packet.messages_mut() {
            for msg in self.pending.iter_mut() {
                if !Self::is_in_send_window(oldest, msg.seq) {
                    break;
                }
                if !msg.is_due(now, retransmit_interval) {
                    continue;
                }

                let len = msg.wire_len(true);
                if len > remaining || messages.len() == MAX_MESSAGES_PER_PACKET {
                    break;
                }
                remaining -= len;

                if msg.last_sent.is_some() {
                    debug!("channel {}: retransmitting message #{}", self.ctx.channel_id, msg.seq);
                }
                msg.last_sent = Some(now);

                // the pending message stays with the channel, the packet gets a copy
                messages.push(self.ctx.new_message(msg.seq, msg.payload.clone()));
            }
        }

        self.ack_pending = false;
        Some(packet)
    }

    fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn release(&mut self) {
        self.ctx.release_all(&mut self.pending);
        self.reorder_buffer.clear();
    }
}
