use std::net::SocketAddr;
use std::sync::Mutex;
use bytes::Bytes;
use crate::transport::{Datagram, DatagramSender};

/// Records sent datagrams instead of sending them. `Datagram::from` holds the destination.
pub struct TrackingDatagramSender {
    local_addr: SocketAddr,
    sent: Mutex<Vec<Datagram>>,
}

impl TrackingDatagramSender {
    pub fn new(local_addr: SocketAddr) -> TrackingDatagramSender {
        TrackingDatagramSender {
            local_addr,
            sent: Default::default(),
        }
    }

    /// removes and returns everything that was sent so far
    pub fn take_sent(&self) -> Vec<Datagram> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn num_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl DatagramSender for TrackingDatagramSender {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        self.sent.lock().unwrap().push(Datagram {
            from: to,
            payload: Bytes::copy_from_slice(buf),
        });
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
