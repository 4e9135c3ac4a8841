pub mod udp;

#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use bytes::Bytes;
use tokio::sync::mpsc;

/// The datagram substrate, abstracted to allow for simulated networks and mocking in tests.
///
/// Sending must not block: a datagram that can not be sent right away may be dropped, as it
///  might be on the network anyway.
#[cfg_attr(test, automock)]
pub trait DatagramSender: Send + Sync + 'static {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()>;

    fn local_addr(&self) -> SocketAddr;
}

/// A received datagram, handed from the I/O side to the update side
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub payload: Bytes,
}

/// Received datagrams waiting for the next update tick. The update side drains it with
///  `try_recv`, so a tick never waits for I/O.
pub type DatagramInbox = mpsc::UnboundedReceiver<Datagram>;
pub type DatagramOutlet = mpsc::UnboundedSender<Datagram>;

/// the thread-safe handoff between a transport's receive side and a connection or listener
pub fn datagram_handoff() -> (DatagramOutlet, DatagramInbox) {
    mpsc::unbounded_channel()
}
