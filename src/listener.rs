use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};
use crate::config::RudpConfig;
use crate::connection::{Connection, ConnectionState, StopHandle};
use crate::error::{RudpError, RudpResult};
use crate::events::{DisconnectReason, EventNotifier, EventReceiver};
use crate::packet::codec::PacketCodec;
use crate::packet::header::PacketType;
use crate::packet::PacketBody;
use crate::transport::{DatagramInbox, DatagramSender};

/// Accepts connections from any number of peers on a single datagram endpoint.
///
/// A connection is created when a connection request arrives from an unknown address. It is
///  announced with a `NewConnection` event once the peer answered the challenge, and removed
///  when it reaches `Disconnected`. All connections share the listener's codec and pools, and
///  raise their events through the listener's event channel.
pub struct Listener {
    config: Arc<RudpConfig>,
    codec: Arc<PacketCodec>,
    sender: Arc<dyn DatagramSender>,
    inbox: DatagramInbox,
    events: EventNotifier,
    connections: FxHashMap<SocketAddr, Connection>,
    running: bool,
    stop_handle: StopHandle,
}

impl Listener {
    pub fn new(config: RudpConfig, sender: Arc<dyn DatagramSender>, inbox: DatagramInbox) -> RudpResult<(Listener, EventReceiver)> {
        config.validate()?;
        let codec = Arc::new(PacketCodec::from_config(&config));
        let (events, event_receiver) = EventNotifier::new();

        let listener = Listener {
            config: Arc::new(config),
            codec,
            sender,
            inbox,
            events,
            connections: Default::default(),
            running: false,
            stop_handle: Default::default(),
        };
        Ok((listener, event_receiver))
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        info!("listening on {:?}", self.sender.local_addr());
        self.running = true;
    }

    /// Disconnects all peers (best effort) and stops accepting new connections. The closed
    ///  connections raise their `Disconnected` events and are removed on the next update.
    pub fn stop(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        info!("stopping listener on {:?} with {} connections", self.sender.local_addr(), self.connections.len());
        for connection in self.connections.values_mut() {
            connection.close(DisconnectReason::ListenerStopped, true, now);
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// stops the listener on its next update, from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_state(&self, peer: SocketAddr) -> Option<ConnectionState> {
        self.connections.get(&peer)
            .map(|c| c.state())
    }

    pub fn send_message(&mut self, peer: SocketAddr, channel_id: u8, payload: Bytes) -> RudpResult<()> {
        match self.connections.get_mut(&peer) {
            Some(connection) => connection.send_message(channel_id, payload),
            None => Err(RudpError::NotConnected),
        }
    }

    /// the connection is removed on the next update, which raises its `Disconnected` event
    pub fn disconnect(&mut self, peer: SocketAddr, now: Instant) {
        if let Some(connection) = self.connections.get_mut(&peer) {
            connection.disconnect(now);
        }
    }

    pub fn update(&mut self, now: Instant) {
        if self.stop_handle.is_stopped() {
            self.stop(now);
        }

        if self.running {
            self.route_datagrams(now);
        }
        else {
            while let Ok(datagram) = self.inbox.try_recv() {
                trace!("listener not running - discarding datagram from {:?}", datagram.from);
            }
        }

        for connection in self.connections.values_mut() {
            connection.update(now);
        }

        self.connections.retain(|peer, connection| {
            if connection.is_disconnected() {
                debug!("removing connection to {:?}", peer);
                false
            }
            else {
                true
            }
        });
    }

    fn route_datagrams(&mut self, now: Instant) {
        while let Ok(datagram) = self.inbox.try_recv() {
            let closed = match self.connections.get_mut(&datagram.from) {
                Some(connection) => {
                    connection.handle_datagram(&datagram.payload, now);
                    connection.is_disconnected()
                }
                None => {
                    self.on_unknown_peer(datagram.from, &datagram.payload, now);
                    false
                }
            };

            // a peer that restarted replaces its old connection with the request that closed it
            if closed {
                if let Some(mut connection) = self.connections.remove(&datagram.from) {
                    debug!("removing connection to {:?}", datagram.from);
                    connection.update(now);
                }
                self.on_unknown_peer(datagram.from, &datagram.payload, now);
            }
        }
    }

    fn on_unknown_peer(&mut self, peer: SocketAddr, buf: &[u8], now: Instant) {
        let packet = match self.codec.deserialize(buf) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping corrupt packet from unknown peer {:?}: {}", peer, e);
                return;
            }
        };

        if let PacketBody::ConnectRequest { client_salt } = packet.body {
            debug!("connection request from {:?}", peer);
            let connection = Connection::accept(
                self.config.clone(),
                peer,
                client_salt,
                rand::random(),
                self.codec.clone(),
                self.sender.clone(),
                self.events.clone(),
                now,
            );
            self.connections.insert(peer, connection);
        }
        else if packet.packet_type() != PacketType::Disconnect {
            debug!("dropping {:?} packet from unknown peer {:?}", packet.packet_type(), peer);
        }
        self.codec.pool().give_back(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::connection::test_support::*;
    use crate::events::ConnectionEvent;
    use crate::test_util::tracking_sender::TrackingDatagramSender;
    use crate::transport::{datagram_handoff, Datagram, DatagramOutlet};

    const CLIENT_SALT: u64 = 0x1234_5678;

    struct TestListener {
        listener: Listener,
        events: EventReceiver,
        sender: Arc<TrackingDatagramSender>,
        outlet: DatagramOutlet,
        now: Instant,
    }

    impl TestListener {
        fn new() -> TestListener {
            let sender = Arc::new(TrackingDatagramSender::new(addr(2000)));
            let (outlet, inbox) = datagram_handoff();
            let (mut listener, events) = Listener::new(server_config(), sender.clone(), inbox).unwrap();
            listener.start();
            TestListener { listener, events, sender, outlet, now: Instant::now() }
        }

        fn receive(&self, from: SocketAddr, packet_type: PacketType, body: PacketBody) {
            self.outlet.send(Datagram { from, payload: encode(packet_type, body) }).unwrap();
        }

        fn tick(&mut self, delta: Duration) {
            self.now += delta;
            self.listener.update(self.now);
        }

        /// sends a connection request and returns the server salt from the challenge
        fn request(&mut self, from: SocketAddr) -> u64 {
            self.receive(from, PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: CLIENT_SALT });
            self.tick(Duration::ZERO);
            let sent = self.sender.take_sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].from, from);
            match decode(&sent[0]).body {
                PacketBody::Challenge { client_salt, server_salt } => {
                    assert_eq!(client_salt, CLIENT_SALT);
                    server_salt
                }
                other => panic!("expected challenge, was {:?}", other),
            }
        }

        fn connect(&mut self, from: SocketAddr) {
            let server_salt = self.request(from);
            self.receive(from, PacketType::ChallengeResponse, PacketBody::ChallengeResponse { salt: CLIENT_SALT ^ server_salt });
            self.tick(Duration::ZERO);
            assert_eq!(sent_types(&self.sender.take_sent()), vec![PacketType::ConnectAccept]);
            assert_eq!(self.events.try_recv().unwrap(), ConnectionEvent::NewConnection { peer: from });
        }
    }

    #[test]
    fn test_request_creates_connecting_connection() {
        let mut l = TestListener::new();
        l.request(addr(1000));
        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connecting));
        assert_eq!(l.listener.num_connections(), 1);
        assert!(l.events.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_request_resends_challenge() {
        let mut l = TestListener::new();
        let server_salt = l.request(addr(1000));
        assert_eq!(l.request(addr(1000)), server_salt);
        assert_eq!(l.listener.num_connections(), 1);
    }

    #[test]
    fn test_wrong_challenge_response() {
        let mut l = TestListener::new();
        let server_salt = l.request(addr(1000));
        l.receive(addr(1000), PacketType::ChallengeResponse, PacketBody::ChallengeResponse { salt: server_salt });
        l.tick(Duration::ZERO);

        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connecting));
        assert_eq!(l.sender.num_sent(), 0);
        assert!(l.events.try_recv().is_err());
    }

    #[test]
    fn test_accept() {
        let mut l = TestListener::new();
        let server_salt = l.request(addr(1000));
        let response = PacketBody::ChallengeResponse { salt: CLIENT_SALT ^ server_salt };
        l.receive(addr(1000), PacketType::ChallengeResponse, response.clone());
        l.tick(Duration::ZERO);
        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connected));
        assert_eq!(sent_types(&l.sender.take_sent()), vec![PacketType::ConnectAccept]);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::NewConnection { peer: addr(1000) });

        // a lost accept is answered by the repeated response
        l.receive(addr(1000), PacketType::ChallengeResponse, response);
        l.tick(Duration::ZERO);
        assert_eq!(sent_types(&l.sender.take_sent()), vec![PacketType::ConnectAccept]);
        assert!(l.events.try_recv().is_err());
    }

    #[test]
    fn test_multiple_peers() {
        let mut l = TestListener::new();
        l.connect(addr(1000));
        l.connect(addr(1001));
        assert_eq!(l.listener.num_connections(), 2);

        l.listener.send_message(addr(1001), 2, Bytes::from_static(b"x")).unwrap();
        l.tick(Duration::ZERO);
        let sent = l.sender.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, addr(1001));
    }

    #[test]
    fn test_unknown_peer_without_request_is_ignored() {
        let mut l = TestListener::new();
        l.receive(addr(1000), PacketType::Keepalive, PacketBody::Keepalive);
        l.receive(addr(1000), PacketType::ChallengeResponse, PacketBody::ChallengeResponse { salt: 1 });
        l.outlet.send(Datagram { from: addr(1000), payload: Bytes::from_static(&[99, 1, 2]) }).unwrap();
        l.tick(Duration::ZERO);

        assert_eq!(l.listener.num_connections(), 0);
        assert_eq!(l.sender.num_sent(), 0);
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let mut l = TestListener::new();
        assert!(matches!(l.listener.send_message(addr(1000), 1, Bytes::new()), Err(RudpError::NotConnected)));
    }

    #[test]
    fn test_not_started() {
        let sender = Arc::new(TrackingDatagramSender::new(addr(2000)));
        let (outlet, inbox) = datagram_handoff();
        let (mut listener, _events) = Listener::new(server_config(), sender.clone(), inbox).unwrap();

        outlet.send(Datagram { from: addr(1000), payload: encode(PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: 1 }) }).unwrap();
        listener.update(Instant::now());
        assert!(!listener.is_running());
        assert_eq!(listener.num_connections(), 0);
        assert_eq!(sender.num_sent(), 0);
    }

    #[test]
    fn test_stop() {
        let mut l = TestListener::new();
        l.connect(addr(1000));
        l.request(addr(1001));

        l.listener.stop_handle().stop();
        l.tick(Duration::ZERO);

        assert!(!l.listener.is_running());
        assert_eq!(l.listener.num_connections(), 0);

        let sent = l.sender.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|d| decode(d).body == PacketBody::Disconnect { reason: DisconnectReason::ListenerStopped.into() }));

        // the half-open connection was never announced
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::ListenerStopped });
        assert!(l.events.try_recv().is_err());

        // new requests are ignored
        l.receive(addr(1002), PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: CLIENT_SALT });
        l.tick(Duration::ZERO);
        assert_eq!(l.sender.num_sent(), 0);
        assert_eq!(l.listener.num_connections(), 0);
    }

    #[test]
    fn test_half_open_connection_times_out() {
        let mut l = TestListener::new();
        l.request(addr(1000));

        l.tick(server_config().connection_timeout);
        assert_eq!(l.listener.num_connections(), 0);
        assert!(l.events.try_recv().is_err());
    }

    #[test]
    fn test_remote_disconnect_removes_connection() {
        let mut l = TestListener::new();
        l.connect(addr(1000));
        l.receive(addr(1000), PacketType::Disconnect, PacketBody::Disconnect { reason: DisconnectReason::Requested.into() });
        l.tick(Duration::ZERO);

        assert_eq!(l.listener.num_connections(), 0);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::Remote });

        // the peer can connect again
        l.connect(addr(1000));
    }

    #[test]
    fn test_disconnect_peer() {
        let mut l = TestListener::new();
        l.connect(addr(1000));
        l.listener.disconnect(addr(1000), l.now);

        assert_eq!(sent_types(&l.sender.take_sent()), vec![PacketType::Disconnect]);
        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Disconnected(DisconnectReason::Requested)));
        assert!(l.events.try_recv().is_err());

        l.tick(Duration::ZERO);
        assert_eq!(l.listener.connection_state(addr(1000)), None);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::Requested });
    }

    #[test]
    fn test_stop_raises_events_on_next_update() {
        let mut l = TestListener::new();
        l.connect(addr(1000));

        l.listener.stop(l.now);
        assert!(!l.listener.is_running());
        assert_eq!(sent_types(&l.sender.take_sent()), vec![PacketType::Disconnect]);
        assert!(l.events.try_recv().is_err());

        l.tick(Duration::ZERO);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::ListenerStopped });
        assert_eq!(l.listener.num_connections(), 0);
    }

    #[test]
    fn test_restarted_peer_replaces_connection() {
        let mut l = TestListener::new();
        l.connect(addr(1000));

        let new_salt = CLIENT_SALT + 1;
        l.receive(addr(1000), PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: new_salt });
        l.tick(Duration::ZERO);

        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::Replaced });
        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connecting));
        assert_eq!(l.listener.num_connections(), 1);

        let sent = l.sender.take_sent();
        assert_eq!(sent.len(), 1);
        let server_salt = match decode(&sent[0]).body {
            PacketBody::Challenge { client_salt, server_salt } => {
                assert_eq!(client_salt, new_salt);
                server_salt
            }
            other => panic!("expected challenge, was {:?}", other),
        };

        l.receive(addr(1000), PacketType::ChallengeResponse, PacketBody::ChallengeResponse { salt: new_salt ^ server_salt });
        l.tick(Duration::ZERO);
        assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connected));
        assert_eq!(sent_types(&l.sender.take_sent()), vec![PacketType::ConnectAccept]);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::NewConnection { peer: addr(1000) });
    }

    #[test]
    fn test_repeated_request_is_no_sign_of_life() {
        let mut l = TestListener::new();
        l.connect(addr(1000));
        let timeout = server_config().connection_timeout;
        let step = timeout / 4;

        for _ in 0..3 {
            l.receive(addr(1000), PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: CLIENT_SALT });
            l.tick(step);
            assert_eq!(l.listener.connection_state(addr(1000)), Some(ConnectionState::Connected));
        }

        l.receive(addr(1000), PacketType::ConnectRequest, PacketBody::ConnectRequest { client_salt: CLIENT_SALT });
        l.tick(timeout - 3 * step);
        assert_eq!(l.listener.connection_state(addr(1000)), None);
        assert_eq!(l.events.try_recv().unwrap(), ConnectionEvent::Disconnected { peer: addr(1000), reason: DisconnectReason::Timeout });
    }
}
