use std::net::SocketAddr;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::sync::mpsc;
use tracing::trace;

/// Why a connection reached `Disconnected`. The code is sent to the partner in the
///  disconnect packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DisconnectReason {
    /// the application called `disconnect()` or stopped the connection
    Requested = 1,
    /// the partner sent a disconnect packet
    Remote = 2,
    /// nothing was received for the configured connection timeout
    Timeout = 3,
    /// the handshake did not complete within the configured number of attempts
    TimedOut = 4,
    /// the listener that owned the connection was stopped
    ListenerStopped = 5,
    /// the peer started a new connection from the same address
    Replaced = 6,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    Connected { peer: SocketAddr },
    Disconnected { peer: SocketAddr, reason: DisconnectReason },
    MessageReceived { peer: SocketAddr, channel_id: u8, payload: Bytes },
    /// a listener accepted a new connection
    NewConnection { peer: SocketAddr },
}

pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Events are raised only from inside an update tick; the application consumes them from the
///  receiving end in its own time.
#[derive(Clone)]
pub struct EventNotifier {
    sender: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventNotifier {
    pub fn new() -> (EventNotifier, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventNotifier { sender }, receiver)
    }

    pub fn send_event(&self, event: ConnectionEvent) {
        trace!("event: {:?}", event);
        // the application may have dropped the receiver, which is no reason to fail
        let _ = self.sender.send(event);
    }
}
