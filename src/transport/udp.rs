use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use crate::transport::{datagram_handoff, Datagram, DatagramInbox, DatagramOutlet, DatagramSender};

/// Size of the receive buffer: the largest possible UDP payload, so that oversized datagrams
///  are received whole and then rejected by the codec rather than silently truncated
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// [DatagramSender] on a tokio UDP socket.
///
/// Sending hands the datagram to a spawned send loop, so `send_datagram` never blocks the
///  update tick. A spawned receive loop forwards every received datagram to the inbox that
///  is returned by [UdpTransport::bind]. Both loops run until the transport is dropped.
pub struct UdpTransport {
    local_addr: SocketAddr,
    send_queue: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    send_loop: JoinHandle<()>,
    recv_loop: JoinHandle<()>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<(Arc<UdpTransport>, DatagramInbox)> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        info!("bound UDP socket to {:?}", local_addr);

        let (outlet, inbox) = datagram_handoff();
        let recv_loop = tokio::spawn(Self::recv_loop(socket.clone(), outlet));

        let (send_queue, send_queue_receiver) = mpsc::unbounded_channel();
        let send_loop = tokio::spawn(Self::send_loop(socket, send_queue_receiver));

        Ok((Arc::new(UdpTransport {
            local_addr,
            send_queue,
            send_loop,
            recv_loop,
        }), inbox))
    }

    async fn send_loop(socket: Arc<UdpSocket>, mut send_queue: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>) {
        while let Some((to, buf)) = send_queue.recv().await {
            trace!("UDP socket: sending datagram to {:?}", to);
            if let Err(e) = socket.send_to(&buf, to).await {
                error!("error sending UDP datagram to {:?}: {}", to, e);
            }
        }
        debug!("send queue was closed - stopping send loop");
    }

    async fn recv_loop(socket: Arc<UdpSocket>, outlet: DatagramOutlet) {
        info!("starting receive loop");

        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            trace!("received datagram from {:?}: {:?}", from, &buf[..num_read]);

            let datagram = Datagram {
                from,
                payload: Bytes::copy_from_slice(&buf[..num_read]),
            };
            if outlet.send(datagram).is_err() {
                debug!("inbox was closed - stopping receive loop");
                break;
            }
        }
    }
}

impl DatagramSender for UdpTransport {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        self.send_queue.send((to, Bytes::copy_from_slice(buf)))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "UDP send loop is not running"))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.send_loop.abort();
        self.recv_loop.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_send_and_receive() {
        let localhost = SocketAddr::from(([127, 0, 0, 1], 0));
        let (a, _a_inbox) = UdpTransport::bind(localhost).await.unwrap();
        let (b, mut b_inbox) = UdpTransport::bind(localhost).await.unwrap();

        a.send_datagram(b.local_addr(), &[1, 2, 3]).unwrap();
        a.send_datagram(b.local_addr(), &[]).unwrap();

        let first = timeout(Duration::from_secs(5), b_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(first, Datagram { from: a.local_addr(), payload: Bytes::from_static(&[1, 2, 3]) });

        let second = timeout(Duration::from_secs(5), b_inbox.recv()).await.unwrap().unwrap();
        assert!(second.payload.is_empty());
    }

    #[tokio::test]
    async fn test_send_right_after_bind() {
        let localhost = SocketAddr::from(([127, 0, 0, 1], 0));
        let (b, mut b_inbox) = UdpTransport::bind(localhost).await.unwrap();

        // no await between binding and sending: nothing may be lost while the socket is not
        //  yet known to be writable
        let (a, _a_inbox) = UdpTransport::bind(localhost).await.unwrap();
        for i in 0..10u8 {
            a.send_datagram(b.local_addr(), &[i]).unwrap();
        }

        for i in 0..10u8 {
            let received = timeout(Duration::from_secs(5), b_inbox.recv()).await.unwrap().unwrap();
            assert_eq!(received.payload, Bytes::copy_from_slice(&[i]));
        }
    }

    #[tokio::test]
    async fn test_drop_stops_receive_loop() {
        let (transport, mut inbox) = UdpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        drop(transport);

        // the aborted loop drops its end of the handoff
        let received = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap();
        assert!(received.is_none());
    }
}
