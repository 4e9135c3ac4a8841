use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};
use crate::bits::bit_writer::BitWriter;
use crate::channel::{Channel, ChannelContext};
use crate::config::RudpConfig;
use crate::error::{RudpError, RudpResult};
use crate::events::{ConnectionEvent, DisconnectReason, EventNotifier, EventReceiver};
use crate::packet::codec::PacketCodec;
use crate::packet::header::PacketType;
use crate::packet::{Packet, PacketBody};
use crate::seq_no::SeqNo;
use crate::transport::{DatagramInbox, DatagramSender};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// transient while the disconnect packet is sent
    Disconnecting,
    /// terminal
    Disconnected(DisconnectReason),
}

/// Requests a connection (or listener) to stop. This can be called from any thread; the next
///  update tick performs the actual shutdown.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum HandshakeStep {
    AwaitingChallenge,
    AwaitingAccept,
}

#[derive(Debug)]
enum Side {
    Client {
        step: HandshakeStep,
        attempts: u32,
        last_attempt: Instant,
    },
    Server,
}

/// Serializes and sends packets to the peer
struct Outbound {
    peer: SocketAddr,
    codec: Arc<PacketCodec>,
    writer: BitWriter,
    sender: Arc<dyn DatagramSender>,
    next_system_seq: SeqNo,
    last_sent: Instant,
}

impl Outbound {
    /// Sending is best effort: failures are logged and the packet is treated as lost. The
    ///  packet goes back to its pool in any case.
    fn send(&mut self, packet: Packet, now: Instant) {
        match self.codec.serialize(&packet, &mut self.writer) {
            Ok(()) => {
                trace!("sending {:?} to {:?}", packet.header, self.peer);
                match self.sender.send_datagram(self.peer, self.writer.get_bytes()) {
                    Ok(()) => self.last_sent = now,
                    Err(e) => debug!("error sending datagram to {:?}: {}", self.peer, e),
                }
            }
            Err(e) => error!("error serializing {:?}: {}", packet.header, e),
        }
        self.codec.pool().give_back(packet);
    }

    fn send_system(&mut self, packet_type: PacketType, body: PacketBody, now: Instant) {
        let mut packet = self.codec.pool().rent(packet_type);
        packet.header.seq = self.next_system_seq;
        self.next_system_seq = self.next_system_seq.next();
        packet.body = body;
        self.send(packet, now);
    }
}

/// A connection to a single peer, multiplexing the configured channels.
///
/// All protocol work happens in [Connection::update], which the owner calls at a fixed cadence
///  and which never blocks. Time is passed in explicitly. Events are raised from inside
///  `update` only.
///
/// Client side connections are created by [Connection::connect] and read received datagrams
///  from their own inbox; server side connections are created and fed by a
///  [Listener](crate::listener::Listener).
pub struct Connection {
    config: Arc<RudpConfig>,
    side: Side,
    state: ConnectionState,
    client_salt: u64,
    server_salt: u64,

    channels: BTreeMap<u8, Box<dyn Channel>>,
    out: Outbound,
    inbox: Option<DatagramInbox>,
    events: EventNotifier,
    delivered: Vec<Bytes>,

    last_received: Instant,
    stop_handle: StopHandle,
    /// raised on the next update after closing
    pending_disconnect_event: Option<DisconnectReason>,
}

impl Connection {
    /// Starts connecting to `config.remote_addr`, sending the first connection request right
    ///  away.
    pub fn connect(config: RudpConfig, sender: Arc<dyn DatagramSender>, inbox: DatagramInbox, now: Instant) -> RudpResult<(Connection, EventReceiver)> {
        config.validate()?;
        let peer = config.remote_addr
            .ok_or_else(|| RudpError::configuration("a client connection requires a remote address"))?;

        let config = Arc::new(config);
        let codec = Arc::new(PacketCodec::from_config(&config));
        let (events, event_receiver) = EventNotifier::new();

        let side = Side::Client {
            step: HandshakeStep::AwaitingChallenge,
            attempts: 0,
            last_attempt: now,
        };

        let mut connection = Connection::new(config, peer, side, rand::random(), 0, codec, sender, Some(inbox), events, now);
        info!("connecting to {:?}", peer);
        connection.send_handshake_step(now);
        Ok((connection, event_receiver))
    }

    /// server side: answers a connection request with a challenge
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn accept(
        config: Arc<RudpConfig>,
        peer: SocketAddr,
        client_salt: u64,
        server_salt: u64,
        codec: Arc<PacketCodec>,
        sender: Arc<dyn DatagramSender>,
        events: EventNotifier,
        now: Instant,
    ) -> Connection {
        let mut connection = Connection::new(config, peer, Side::Server, client_salt, server_salt, codec, sender, None, events, now);
        connection.send_challenge(now);
        connection
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        config: Arc<RudpConfig>,
        peer: SocketAddr,
        side: Side,
        client_salt: u64,
        server_salt: u64,
        codec: Arc<PacketCodec>,
        sender: Arc<dyn DatagramSender>,
        inbox: Option<DatagramInbox>,
        events: EventNotifier,
        now: Instant,
    ) -> Connection {
        let channels = config.channels.iter()
            .map(|(&channel_id, &mode)| {
                let ctx = ChannelContext::new(channel_id, mode, &config, codec.pool().clone());
                (channel_id, mode.channel_factory()(ctx))
            })
            .collect();

        let out = Outbound {
            peer,
            codec,
            writer: BitWriter::new(config.max_packet_size),
            sender,
            next_system_seq: SeqNo::ZERO,
            last_sent: now,
        };

        Connection {
            config,
            side,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt,
            channels,
            out,
            inbox,
            events,
            delivered: Vec::new(),
            last_received: now,
            stop_handle: StopHandle::default(),
            pending_disconnect_event: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.out.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, ConnectionState::Disconnected(_))
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Queues a message for sending on the given channel. Messages can be queued while the
    ///  connection is still being established; they are sent once it is connected.
    pub fn send_message(&mut self, channel_id: u8, payload: Bytes) -> RudpResult<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            ConnectionState::Disconnected(DisconnectReason::Timeout | DisconnectReason::TimedOut) => return Err(RudpError::ConnectionTimeout),
            ConnectionState::Disconnecting | ConnectionState::Disconnected(_) => return Err(RudpError::NotConnected),
        }

        match self.channels.get_mut(&channel_id) {
            Some(channel) => channel.send_message(payload),
            None => Err(RudpError::configuration(format!("channel {} is not configured", channel_id))),
        }
    }

    /// number of messages that are queued or awaiting acknowledgement, across all channels
    pub fn num_pending(&self) -> usize {
        self.channels.values()
            .map(|c| c.num_pending())
            .sum()
    }

    /// Sends a best effort disconnect packet and closes the connection immediately. The
    ///  `Disconnected` event is raised by the next update.
    pub fn disconnect(&mut self, now: Instant) {
        self.close(DisconnectReason::Requested, true, now);
    }

    pub fn update(&mut self, now: Instant) {
        if self.stop_handle.is_stopped() {
            self.close(DisconnectReason::Requested, true, now);
        }

        if !self.is_disconnected() {
            self.drain_inbox(now);

            match self.state {
                ConnectionState::Connecting => self.update_handshake(now),
                ConnectionState::Connected => self.update_connected(now),
                ConnectionState::Disconnecting | ConnectionState::Disconnected(_) => {}
            }
        }

        if let Some(reason) = self.pending_disconnect_event.take() {
            self.events.send_event(ConnectionEvent::Disconnected { peer: self.out.peer, reason });
        }
    }

    fn drain_inbox(&mut self, now: Instant) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };

        while let Ok(datagram) = inbox.try_recv() {
            if datagram.from != self.out.peer {
                debug!("dropping datagram from unexpected sender {:?}", datagram.from);
                continue;
            }
            self.handle_datagram(&datagram.payload, now);
            if self.is_disconnected() {
                return;
            }
        }
        self.inbox = Some(inbox);
    }

    fn update_handshake(&mut self, now: Instant) {
        match self.side {
            Side::Client { attempts, last_attempt, .. } => {
                if now.saturating_duration_since(last_attempt) < self.config.connect_retry_interval {
                    return;
                }
                if attempts >= self.config.max_connect_attempts {
                    warn!("no response from {:?} after {} attempts - giving up", self.out.peer, attempts);
                    self.close(DisconnectReason::TimedOut, false, now);
                    return;
                }
                self.send_handshake_step(now);
            }
            Side::Server => {
                if now.saturating_duration_since(self.last_received) >= self.config.connection_timeout {
                    debug!("handshake with {:?} was not completed - dropping", self.out.peer);
                    self.close(DisconnectReason::Timeout, false, now);
                }
            }
        }
    }

    fn update_connected(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_received) >= self.config.connection_timeout {
            warn!("nothing received from {:?} for {:?} - closing connection", self.out.peer, self.config.connection_timeout);
            self.close(DisconnectReason::Timeout, false, now);
            return;
        }

        for channel in self.channels.values_mut() {
            if let Some(packet) = channel.update(now) {
                self.out.send(packet, now);
            }
        }

        if now.saturating_duration_since(self.out.last_sent) >= self.config.keepalive_interval {
            trace!("sending keepalive to {:?}", self.out.peer);
            self.out.send_system(PacketType::Keepalive, PacketBody::Keepalive, now);
        }
    }

    /// client side: (re-)sends the packet for the current handshake step
    fn send_handshake_step(&mut self, now: Instant) {
        let Side::Client { step, attempts, last_attempt } = &mut self.side else {
            return;
        };
        *attempts += 1;
        *last_attempt = now;

        match *step {
            HandshakeStep::AwaitingChallenge => {
                debug!("sending connection request #{} to {:?}", attempts, self.out.peer);
                self.out.send_system(PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: self.client_salt }, now);
            }
            HandshakeStep::AwaitingAccept => {
                debug!("sending challenge response #{} to {:?}", attempts, self.out.peer);
                let salt = self.client_salt ^ self.server_salt;
                self.out.send_system(PacketType::ChallengeResponse, PacketBody::ChallengeResponse { salt }, now);
            }
        }
    }

    fn send_challenge(&mut self, now: Instant) {
        let body = PacketBody::Challenge {
            client_salt: self.client_salt,
            server_salt: self.server_salt,
        };
        self.out.send_system(PacketType::Challenge, body, now);
    }

    /// Handles a single received datagram. Corrupt datagrams are logged and dropped, they
    ///  neither count as a sign of life nor affect the connection otherwise. Neither do
    ///  handshake packets on an established connection: a stale handshake retry must not keep
    ///  a dead connection alive.
    pub(crate) fn handle_datagram(&mut self, buf: &[u8], now: Instant) {
        if self.is_disconnected() {
            return;
        }

        let packet = match self.out.codec.deserialize(buf) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping packet from {:?}: {}", self.out.peer, e);
                return;
            }
        };

        if !(self.state == ConnectionState::Connected && packet.packet_type().is_handshake()) {
            self.last_received = now;
        }
        self.on_packet(&packet, now);
        self.out.codec.pool().give_back(packet);
    }

    fn on_packet(&mut self, packet: &Packet, now: Instant) {
        match &packet.body {
            PacketBody::ConnectRequest { client_salt } => self.on_connect_request(*client_salt, now),
            PacketBody::Challenge { client_salt, server_salt } => self.on_challenge(*client_salt, *server_salt, now),
            PacketBody::ChallengeResponse { salt } => self.on_challenge_response(*salt, now),
            PacketBody::ConnectAccept => self.on_connect_accept(),
            PacketBody::Disconnect { reason } => {
                info!("{:?} disconnected (reason code {})", self.out.peer, reason);
                self.close(DisconnectReason::Remote, false, now);
            }
            PacketBody::Keepalive => {
                trace!("keepalive from {:?}", self.out.peer);
                self.on_server_activity();
            }
            PacketBody::Data { channel_id, .. } => {
                self.on_server_activity();
                self.on_data(*channel_id, packet);
            }
        }
    }

    fn on_connect_request(&mut self, client_salt: u64, now: Instant) {
        if !matches!(self.side, Side::Server) {
            debug!("ignoring connection request on client side connection");
            return;
        }

        match self.state {
            ConnectionState::Connecting => {
                if client_salt != self.client_salt {
                    debug!("new client salt from {:?}", self.out.peer);
                    self.client_salt = client_salt;
                }
                debug!("repeated connection request from {:?} - sending challenge again", self.out.peer);
                self.send_challenge(now);
            }
            ConnectionState::Connected if client_salt != self.client_salt => {
                // the client restarted on the same address without disconnecting
                info!("{:?} started a new connection - closing the old one", self.out.peer);
                self.close(DisconnectReason::Replaced, false, now);
            }
            _ => debug!("ignoring repeated connection request from connected peer {:?}", self.out.peer),
        }
    }

    fn on_challenge(&mut self, client_salt: u64, server_salt: u64, now: Instant) {
        let Side::Client { step, attempts, .. } = &mut self.side else {
            debug!("ignoring challenge on server side connection");
            return;
        };
        if self.state != ConnectionState::Connecting {
            trace!("ignoring challenge after handshake");
            return;
        }
        if client_salt != self.client_salt {
            warn!("challenge from {:?} does not match our connection request - ignoring", self.out.peer);
            return;
        }
        if *step == HandshakeStep::AwaitingAccept && server_salt == self.server_salt {
            trace!("duplicate challenge");
            return;
        }

        *step = HandshakeStep::AwaitingAccept;
        *attempts = 0;
        self.server_salt = server_salt;
        self.send_handshake_step(now);
    }

    fn on_challenge_response(&mut self, salt: u64, now: Instant) {
        if !matches!(self.side, Side::Server) {
            debug!("ignoring challenge response on client side connection");
            return;
        }
        if salt != self.client_salt ^ self.server_salt {
            warn!("invalid challenge response from {:?} - ignoring", self.out.peer);
            return;
        }

        match self.state {
            ConnectionState::Connecting => {
                info!("accepted connection from {:?}", self.out.peer);
                self.state = ConnectionState::Connected;
                self.out.send_system(PacketType::ConnectAccept, PacketBody::ConnectAccept, now);
                self.events.send_event(ConnectionEvent::NewConnection { peer: self.out.peer });
            }
            ConnectionState::Connected => {
                debug!("repeated challenge response from {:?} - sending accept again", self.out.peer);
                self.out.send_system(PacketType::ConnectAccept, PacketBody::ConnectAccept, now);
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected(_) => {}
        }
    }

    fn on_connect_accept(&mut self) {
        match self.side {
            Side::Client { step: HandshakeStep::AwaitingAccept, .. } if self.state == ConnectionState::Connecting => {
                self.on_connected();
            }
            _ => trace!("ignoring connection accept"),
        }
    }

    /// The server sends keepalive and data packets only after it verified the challenge
    ///  response, so they complete the handshake even if the accept packet was lost
    fn on_server_activity(&mut self) {
        if let Side::Client { step: HandshakeStep::AwaitingAccept, .. } = self.side {
            if self.state == ConnectionState::Connecting {
                debug!("implicit accept from {:?}", self.out.peer);
                self.on_connected();
            }
        }
    }

    fn on_connected(&mut self) {
        info!("connected to {:?}", self.out.peer);
        self.state = ConnectionState::Connected;
        self.events.send_event(ConnectionEvent::Connected { peer: self.out.peer });
    }

    fn on_data(&mut self, channel_id: u8, packet: &Packet) {
        if self.state != ConnectionState::Connected {
            debug!("dropping data packet from {:?} before connection is established", self.out.peer);
            return;
        }

        let Some(channel) = self.channels.get_mut(&channel_id) else {
            warn!("dropping packet from {:?} for unknown channel {}", self.out.peer, channel_id);
            return;
        };
        if PacketType::for_delivery_mode(channel.delivery_mode()) != packet.packet_type() {
            warn!("dropping {:?} packet from {:?}: channel {} is {:?}", packet.packet_type(), self.out.peer, channel_id, channel.delivery_mode());
            return;
        }

        channel.receive(packet, &mut self.delivered);
        for payload in self.delivered.drain(..) {
            self.events.send_event(ConnectionEvent::MessageReceived {
                peer: self.out.peer,
                channel_id,
                payload,
            });
        }
    }

    /// Moves to `Disconnected`, releasing all channels. Only connections that were announced
    ///  to the application raise a disconnect event (on the next update): all client side
    ///  connections, and server side connections that completed the handshake.
    pub(crate) fn close(&mut self, reason: DisconnectReason, notify_peer: bool, now: Instant) {
        if self.is_disconnected() {
            return;
        }
        let was_announced = match self.side {
            Side::Client { .. } => true,
            Side::Server => self.state == ConnectionState::Connected,
        };

        self.state = ConnectionState::Disconnecting;
        if notify_peer {
            self.out.send_system(PacketType::Disconnect, PacketBody::Disconnect { reason: reason.into() }, now);
        }

        self.state = ConnectionState::Disconnected(reason);
        self.release();
        info!("connection to {:?} closed: {:?}", self.out.peer, reason);

        if was_announced {
            self.pending_disconnect_event = Some(reason);
        }
    }

    fn release(&mut self) {
        for channel in self.channels.values_mut() {
            channel.release();
        }
        self.channels.clear();

        if let Some(mut inbox) = self.inbox.take() {
            inbox.close();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::DeliveryMode;
    use crate::packet::header::PacketType;
    use crate::transport::Datagram;

    pub fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    pub fn server_config() -> RudpConfig {
        RudpConfig::default_ipv4(addr(2000))
            .with_channel(1, DeliveryMode::ReliableOrdered)
            .with_channel(2, DeliveryMode::Unreliable)
    }

    pub fn client_config() -> RudpConfig {
        let mut config = RudpConfig::default_ipv4(addr(1000))
            .with_remote_addr(addr(2000))
            .with_channel(1, DeliveryMode::ReliableOrdered)
            .with_channel(2, DeliveryMode::Unreliable);
        config.max_connect_attempts = 3;
        config
    }

    pub fn test_codec() -> PacketCodec {
        PacketCodec::from_config(&client_config())
    }

    pub fn encode(packet_type: PacketType, body: PacketBody) -> Bytes {
        let mut packet = Packet::new(packet_type);
        packet.body = body;
        let mut writer = BitWriter::new(1500);
        test_codec().serialize(&packet, &mut writer).unwrap();
        Bytes::copy_from_slice(writer.get_bytes())
    }

    pub fn decode(datagram: &Datagram) -> Packet {
        test_codec().deserialize(&datagram.payload).unwrap()
    }

    pub fn sent_types(sent: &[Datagram]) -> Vec<PacketType> {
        sent.iter()
            .map(|d| decode(d).packet_type())
            .collect()
    }
}
