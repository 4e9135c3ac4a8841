use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::trace;
use crate::transport::{datagram_handoff, Datagram, DatagramInbox, DatagramOutlet, DatagramSender};

/// An in-memory datagram network that loses, duplicates and reorders datagrams at configurable
///  rates. All randomness comes from a seeded RNG, so a given seed and sequence of sends always
///  produces the same delivery pattern.
///
/// Reordering is done by holding a datagram back and delivering it after the next datagram
///  that goes to the same destination.
#[derive(Clone)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

struct NetworkState {
    rng: StdRng,
    loss_rate: f64,
    duplication_rate: f64,
    reorder_rate: f64,
    endpoints: FxHashMap<SocketAddr, DatagramOutlet>,
    held_back: FxHashMap<SocketAddr, Vec<Datagram>>,
    stats: NetworkStats,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NetworkStats {
    pub sent: usize,
    pub lost: usize,
    pub duplicated: usize,
    pub reordered: usize,
}

impl SimulatedNetwork {
    pub fn new(seed: u64) -> SimulatedNetwork {
        SimulatedNetwork {
            state: Arc::new(Mutex::new(NetworkState {
                rng: StdRng::seed_from_u64(seed),
                loss_rate: 0.0,
                duplication_rate: 0.0,
                reorder_rate: 0.0,
                endpoints: FxHashMap::default(),
                held_back: FxHashMap::default(),
                stats: NetworkStats::default(),
            })),
        }
    }

    pub fn with_loss_rate(self, loss_rate: f64) -> SimulatedNetwork {
        self.state.lock().unwrap().loss_rate = loss_rate;
        self
    }

    pub fn with_duplication_rate(self, duplication_rate: f64) -> SimulatedNetwork {
        self.state.lock().unwrap().duplication_rate = duplication_rate;
        self
    }

    pub fn with_reorder_rate(self, reorder_rate: f64) -> SimulatedNetwork {
        self.state.lock().unwrap().reorder_rate = reorder_rate;
        self
    }

    /// registers an endpoint at the given address, returning its sending side and its inbox
    pub fn endpoint(&self, addr: SocketAddr) -> (Arc<SimulatedEndpoint>, DatagramInbox) {
        let (outlet, inbox) = datagram_handoff();
        self.state.lock().unwrap().endpoints.insert(addr, outlet);

        (Arc::new(SimulatedEndpoint {
            addr,
            network: self.clone(),
        }), inbox)
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.lock().unwrap().stats
    }

    fn transmit(&self, from: SocketAddr, to: SocketAddr, buf: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.stats.sent += 1;

        let loss_rate = state.loss_rate;
        if state.rng.gen_bool(loss_rate) {
            trace!("simulated network: losing datagram {:?} -> {:?}", from, to);
            state.stats.lost += 1;
            return;
        }

        let datagram = Datagram {
            from,
            payload: Bytes::copy_from_slice(buf),
        };

        let reorder_rate = state.reorder_rate;
        if state.rng.gen_bool(reorder_rate) {
            trace!("simulated network: holding back datagram {:?} -> {:?}", from, to);
            state.stats.reordered += 1;
            state.held_back.entry(to).or_default().push(datagram);
            return;
        }

        let duplication_rate = state.duplication_rate;
        let duplicate = state.rng.gen_bool(duplication_rate);
        if duplicate {
            state.stats.duplicated += 1;
        }

        let held_back = state.held_back.remove(&to).unwrap_or_default();
        if let Some(outlet) = state.endpoints.get(&to) {
            if duplicate {
                let _ = outlet.send(datagram.clone());
            }
            let _ = outlet.send(datagram);
            for d in held_back {
                let _ = outlet.send(d);
            }
        }
        else {
            trace!("simulated network: no endpoint at {:?} - dropping datagram", to);
        }
    }
}

/// The sending side of an endpoint in a [SimulatedNetwork]
pub struct SimulatedEndpoint {
    addr: SocketAddr,
    network: SimulatedNetwork,
}

impl DatagramSender for SimulatedEndpoint {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        self.network.transmit(self.addr, to, buf);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
