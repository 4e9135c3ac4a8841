use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use crate::error::{RudpError, RudpResult};
use crate::message::RawMessage;
use crate::packet::header::{PacketHeader, PacketType};

/// Delivery guarantee of a channel
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DeliveryMode {
    /// fire and forget: no sequence numbers, no retransmission, no deduplication
    Unreliable,
    /// messages that are not newer than the last delivered message are discarded
    UnreliableSequenced,
    /// every message is delivered exactly once and in order
    ReliableOrdered,
}

/// The largest UDP payload that fits into a full Ethernet frame over IPv4 without optional
///  headers: `1500 - 20 - 8`
pub const MAX_UDP_PAYLOAD: usize = 1472;

/// Configuration is validated when a connection or listener is created, and shared as
///  `Arc<RudpConfig>` afterwards. There is no way to modify it once it is in use.
#[derive(Clone, Debug)]
pub struct RudpConfig {
    pub local_addr: SocketAddr,
    /// the listener's address, required for client side connections
    pub remote_addr: Option<SocketAddr>,

    /// Channel id -> delivery mode. Both sides of a connection must use the same channels.
    pub channels: BTreeMap<u8, DeliveryMode>,

    /// Time after which an unacknowledged reliable message is sent again. This should be
    ///  somewhat above the round trip time.
    pub retransmit_interval: Duration,
    /// a keepalive packet is sent if nothing else was sent for this long
    pub keepalive_interval: Duration,
    /// A connection is closed if nothing was received for this long. Must be at least twice
    ///  the keepalive interval.
    pub connection_timeout: Duration,

    pub connect_retry_interval: Duration,
    /// number of attempts for each handshake step before the connection attempt is given up
    pub max_connect_attempts: u32,

    /// Maximum datagram size, including the packet header. Fragmentation is not supported,
    ///  so every single message (plus overhead) must fit into this.
    pub max_packet_size: usize,

    /// pooled packets per packet type - packets in excess of this are discarded when returned
    pub packet_pool_size: usize,
    pub message_pool_size: usize,
}

impl RudpConfig {
    pub fn default_ipv4(local_addr: SocketAddr) -> RudpConfig {
        RudpConfig {
            local_addr,
            remote_addr: None,
            channels: BTreeMap::new(),
            retransmit_interval: Duration::from_millis(100),
            keepalive_interval: Duration::from_millis(1000),
            connection_timeout: Duration::from_secs(10),
            connect_retry_interval: Duration::from_millis(500),
            max_connect_attempts: 10,
            max_packet_size: 1200,
            packet_pool_size: 256,
            message_pool_size: 1024,
        }
    }

    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> RudpConfig {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub fn with_channel(mut self, channel_id: u8, mode: DeliveryMode) -> RudpConfig {
        self.channels.insert(channel_id, mode);
        self
    }

    /// the largest application payload that fits into a single packet on the given channel
    pub fn max_message_len(&self, mode: DeliveryMode) -> usize {
        let packet_type = PacketType::for_delivery_mode(mode);
        let overhead = PacketHeader::serialized_len(packet_type)
            + 2 // channel id, message count
            + RawMessage::wire_overhead(packet_type.is_sequenced());
        self.max_packet_size.saturating_sub(overhead)
    }

    pub fn validate(&self) -> RudpResult<()> {
        if self.channels.is_empty() {
            return Err(RudpError::configuration("at least one channel must be configured"));
        }
        if self.max_packet_size > MAX_UDP_PAYLOAD {
            return Err(RudpError::configuration(format!("max packet size {} exceeds the maximum UDP payload of {}", self.max_packet_size, MAX_UDP_PAYLOAD)));
        }
        if self.max_packet_size < PacketType::max_system_packet_len() {
            return Err(RudpError::configuration(format!("max packet size {} is too small for handshake packets of {} bytes", self.max_packet_size, PacketType::max_system_packet_len())));
        }
        if self.channels.values().any(|&mode| self.max_message_len(mode) == 0) {
            return Err(RudpError::configuration(format!("max packet size {} leaves no room for payload", self.max_packet_size)));
        }
        if self.retransmit_interval.is_zero() {
            return Err(RudpError::configuration("retransmit interval must be positive"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(RudpError::configuration("keepalive interval must be positive"));
        }
        if self.connection_timeout < 2 * self.keepalive_interval {
            return Err(RudpError::configuration(format!("connection timeout {:?} must be at least twice the keepalive interval {:?}", self.connection_timeout, self.keepalive_interval)));
        }
        if self.connect_retry_interval.is_zero() {
            return Err(RudpError::configuration("connect retry interval must be positive"));
        }
        if self.max_connect_attempts == 0 {
            return Err(RudpError::configuration("at least one connect attempt is required"));
        }
        Ok(())
    }
}
