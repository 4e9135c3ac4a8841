use std::time::Instant;
use bytes::Bytes;
use crate::buffers::pool::{Recycle, RecyclablePool};
use crate::seq_no::SeqNo;

/// One application payload together with its sequencing metadata.
///
/// A message is owned by exactly one place at a time: a packet being built or parsed, a
///  channel's pending list, or the message pool.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawMessage {
    /// only meaningful for sequenced and reliable channels
    pub seq: SeqNo,
    pub payload: Bytes,
    /// the last time this message was put on the wire, driving retransmission
    pub last_sent: Option<Instant>,
}

impl RawMessage {
    /// per-message overhead on the wire: length field plus (optional) sequence number
    pub fn wire_overhead(sequenced: bool) -> usize {
        if sequenced { 4 } else { 2 }
    }

    pub fn wire_len(&self, sequenced: bool) -> usize {
        Self::wire_overhead(sequenced) + self.payload.len()
    }

    pub fn is_due(&self, now: Instant, retransmit_interval: std::time::Duration) -> bool {
        match self.last_sent {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= retransmit_interval,
        }
    }
}

impl Recycle for RawMessage {
    fn reset(&mut self) {
        self.seq = SeqNo::ZERO;
        self.payload = Bytes::new();
        self.last_sent = None;
    }
}

pub type MessagePool = RecyclablePool<RawMessage>;

pub fn new_message_pool(max_pool_size: usize) -> MessagePool {
    RecyclablePool::new("message pool", max_pool_size, RawMessage::default)
}
