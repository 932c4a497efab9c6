//! An in-process stand-in for UDP, used by simulations and tests.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHasher;
use std::{
    hash::BuildHasherDefault,
    io,
    net::SocketAddrV4,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

/// A set of attached endpoints that exchange datagrams by address. Clones
/// share the same endpoints.
///
/// Delivery is unordered between senders and silent on failure, the same
/// as UDP: a datagram for an address nobody is attached to disappears.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: FxDashMap<SocketAddrV4, UnboundedSender<Vec<u8>>>,
    loss: Option<Mutex<Loss>>,
}

#[derive(Debug)]
struct Loss {
    /// Decides which datagrams survive
    rng: SmallRng,
    /// A number in the range [0, 1]
    success_rate: f64,
}

impl MemoryNetwork {
    /// Creates a network that delivers every datagram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network that delivers each datagram with probability
    /// `success_rate`. The random source is seeded so runs are repeatable.
    pub fn unreliable(success_rate: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints: Default::default(),
                loss: Some(Mutex::new(Loss {
                    rng: SmallRng::seed_from_u64(0xBAD5EED),
                    success_rate: success_rate.clamp(0.0, 1.0),
                })),
            }),
        }
    }

    /// Attaches an endpoint at `address`. The endpoint detaches when the
    /// returned transport is dropped.
    pub fn attach(&self, address: SocketAddrV4) -> Result<MemoryTransport, TransportError> {
        use dashmap::mapref::entry::Entry;
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.inner.endpoints.entry(address) {
            Entry::Occupied(_) => Err(TransportError::Bind {
                address,
                source: io::ErrorKind::AddrInUse.into(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(sender);
                Ok(MemoryTransport {
                    local: address,
                    network: self.clone(),
                    receiver,
                })
            }
        }
    }

    /// Delivers a datagram as if it had come from outside the network.
    pub fn inject(&self, to: SocketAddrV4, datagram: Vec<u8>) {
        self.deliver(to, datagram)
    }

    pub fn is_attached(&self, address: SocketAddrV4) -> bool {
        self.inner.endpoints.contains_key(&address)
    }

    fn deliver(&self, to: SocketAddrV4, datagram: Vec<u8>) {
        if let Some(loss) = &self.inner.loss {
            let mut loss = loss.lock().unwrap_or_else(PoisonError::into_inner);
            let success_rate = loss.success_rate;
            if !loss.rng.gen_bool(success_rate) {
                tracing::trace!("Lost datagram for {to}");
                return;
            }
        }
        match self.inner.endpoints.get(&to) {
            Some(endpoint) => {
                // A closed channel means the endpoint is being torn down
                if endpoint.send(datagram).is_err() {
                    tracing::trace!("Endpoint {to} closed before delivery");
                }
            }
            None => tracing::trace!("No endpoint attached at {to}"),
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    local: SocketAddrV4,
    network: MemoryNetwork,
    receiver: UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    /// The network this endpoint is attached to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    async fn send_to(&self, datagram: &[u8], to: SocketAddrV4) -> Result<(), TransportError> {
        self.network.deliver(to, datagram.to_vec());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.receiver.recv().await.ok_or(TransportError::Detached)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.inner.endpoints.remove(&self.local);
    }
}
