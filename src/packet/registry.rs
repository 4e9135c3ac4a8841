use std::sync::Arc;
use rustc_hash::FxHashMap;
use tracing::debug;
use crate::buffers::pool::RecyclablePool;
use crate::message::MessagePool;
use crate::packet::header::PacketType;
use crate::packet::Packet;

pub type PacketFactory = fn() -> Packet;

/// Maps every packet type tag to the factory that creates empty packets of that type. It is
///  populated once at startup and not modified afterwards.
pub struct PacketRegistry {
    factories: FxHashMap<PacketType, PacketFactory>,
}

impl PacketRegistry {
    pub fn standard() -> PacketRegistry {
        let mut registry = PacketRegistry {
            factories: FxHashMap::default(),
        };
        registry.register(PacketType::ConnectRequest, || Packet::new(PacketType::ConnectRequest));
        registry.register(PacketType::Challenge, || Packet::new(PacketType::Challenge));
        registry.register(PacketType::ChallengeResponse, || Packet::new(PacketType::ChallengeResponse));
        registry.register(PacketType::ConnectAccept, || Packet::new(PacketType::ConnectAccept));
        registry.register(PacketType::Disconnect, || Packet::new(PacketType::Disconnect));
        registry.register(PacketType::Keepalive, || Packet::new(PacketType::Keepalive));
        registry.register(PacketType::DataUnreliable, || Packet::new(PacketType::DataUnreliable));
        registry.register(PacketType::DataSequenced, || Packet::new(PacketType::DataSequenced));
        registry.register(PacketType::DataReliable, || Packet::new(PacketType::DataReliable));
        registry
    }

    fn register(&mut self, packet_type: PacketType, factory: PacketFactory) {
        let prev = self.factories.insert(packet_type, factory);
        assert!(prev.is_none(), "duplicate registration for packet type {:?}", packet_type);
    }

    pub fn factory(&self, packet_type: PacketType) -> Option<PacketFactory> {
        self.factories.get(&packet_type).copied()
    }

    pub fn packet_types(&self) -> impl Iterator<Item = PacketType> + '_ {
        self.factories.keys().copied()
    }
}

/// One [RecyclablePool] per packet type, plus the pool for the messages that data packets
///  carry.
pub struct PacketPool {
    pools: FxHashMap<PacketType, RecyclablePool<Packet>>,
    message_pool: Arc<MessagePool>,
}

impl PacketPool {
    pub fn new(registry: &PacketRegistry, max_pool_size_per_type: usize, message_pool: Arc<MessagePool>) -> PacketPool {
        let pools = registry.packet_types()
            .filter_map(|packet_type| {
                let factory = registry.factory(packet_type)?;
                Some((packet_type, RecyclablePool::new("packet pool", max_pool_size_per_type, factory)))
            })
            .collect();

        PacketPool {
            pools,
            message_pool,
        }
    }

    pub fn message_pool(&self) -> &Arc<MessagePool> {
        &self.message_pool
    }

    pub fn rent(&self, packet_type: PacketType) -> Packet {
        match self.pools.get(&packet_type) {
            Some(pool) => pool.rent(),
            None => {
                debug!("no pool registered for packet type {:?} - creating unpooled packet", packet_type);
                Packet::new(packet_type)
            }
        }
    }

    /// Returns a packet to its pool. Messages that the packet still holds go back to the
    ///  message pool; a caller that wants to keep messages must take them out first.
    pub fn give_back(&self, mut packet: Packet) {
        if let Some(messages) = packet.messages_mut() {
            for msg in messages.drain(..) {
                self.message_pool.give_back(msg);
            }
        }

        if let Some(pool) = self.pools.get(&packet.packet_type()) {
            pool.give_back(packet);
        }
    }

    pub fn available(&self, packet_type: PacketType) -> usize {
        self.pools.get(&packet_type)
            .map(|p| p.available())
            .unwrap_or(0)
    }
}
