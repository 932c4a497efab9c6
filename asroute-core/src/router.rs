//! The router: one receive loop owning all of a router's state.
//!
//! Each datagram is handled by the first rule that applies:
//!
//! 1. A datagram that does not decode is dropped.
//! 2. A hello runs the path-vector protocol until it converges.
//! 3. A packet whose TTL is 0 is dropped.
//! 4. A packet addressed to the router is delivered, after reassembly when
//!    fragmentation is enabled.
//! 5. Any other packet is looked up in the routing table and sent to the
//!    next hop with its TTL decremented, fragmented to the hop's MTU.
//!
//! None of these are errors. Only a transport that stops receiving or a
//! derived table that cannot be written stops a router.

use crate::{
    as_path::AsId,
    fragmentation::{fragment, Fragments, Mtu},
    packet::{Framing, Packet, PacketError, DEFAULT_TTL},
    path_vector::{
        is_hello, neighbors, Advertisement, PathVector, PathVectorState, DEFAULT_IDLE_TIMEOUT,
        DERIVED_MTU, HELLO,
    },
    reassembly::{AddFragmentResult, Reassembly, DEFAULT_EXPIRY},
    routes::{write_routes, RouteEntry, RouteFileError, RouteSource},
    routing_table::{LookupPolicy, RoutingTable},
    shutdown::Shutdown,
    transport::{Transport, TransportError},
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{io, net::{Ipv4Addr, SocketAddrV4}, path::PathBuf, time::Duration};
use thiserror::Error as ThisError;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{timeout, Instant},
};

/// Fragment identifiers of originated control packets are drawn below this
const CONTROL_ID_RANGE: u16 = 1000;

/// How a router behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// The wire layout spoken on every link
    pub framing: Framing,
    /// How destinations are matched against routes
    pub policy: LookupPolicy,
    /// Whether packets are fragmented to next hop MTUs and reassembled on
    /// delivery. Has no effect with [`Framing::Basic`].
    pub fragmentation: bool,
    /// The TTL of control packets the router originates
    pub time_to_live: u8,
    /// How long the path-vector protocol waits for another datagram before
    /// it converges
    pub idle_timeout: Duration,
    /// How long a partially reassembled message is kept without new
    /// fragments
    pub reassembly_expiry: Duration,
    /// The MTU given to derived routes
    pub derived_mtu: Mtu,
    /// Where derived tables are written as `BGP_<port>.txt`. Not written
    /// when `None`.
    pub derived_table_dir: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            policy: LookupPolicy::default(),
            fragmentation: true,
            time_to_live: DEFAULT_TTL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reassembly_expiry: DEFAULT_EXPIRY,
            derived_mtu: DERIVED_MTU,
            derived_table_dir: None,
        }
    }
}

/// What became of one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The datagram was a hello and the protocol ran to convergence
    PathVectorRun,
    Dropped(DropReason),
    /// A fragment was buffered and its message is still incomplete
    Buffered { fragment_id: u16, buffered: usize },
    /// A message addressed to this router was received whole
    Delivered(Packet),
    /// The packet was sent on as `fragments` datagrams
    Forwarded {
        next_hop: SocketAddrV4,
        fragments: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(PacketError),
    TtlExpired,
    NoRoute(SocketAddrV4),
    /// The next hop's MTU cannot fit the header with any payload
    MtuTooSmall(Mtu),
    /// Fragmenting would need an offset larger than the framing carries
    OffsetOverflow,
    /// An advertisement arrived while the protocol was not running
    StaleAdvertisement,
}

/// Conditions that stop a router.
#[derive(Debug, ThisError)]
pub enum RouterError {
    #[error("Could not load routes: {0}")]
    Routes(#[from] RouteFileError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("Could not write derived table {path:?}: {source}")]
    Persist { path: PathBuf, source: io::Error },
}

/// A router bound to one transport.
pub struct Router<T: Transport> {
    address: SocketAddrV4,
    transport: T,
    config: RouterConfig,
    /// The routes loaded at startup, kept for neighbors and derivation
    local_routes: Vec<RouteEntry>,
    table: RoutingTable,
    path_vector: PathVector,
    reassembly: Reassembly,
    /// Where delivered messages are published, once someone subscribes
    delivered: Option<UnboundedSender<Packet>>,
    rng: SmallRng,
    /// Replaced by the signal given to [`Router::run`]
    shutdown: Shutdown,
}

impl<T: Transport> Router<T> {
    /// Creates a router that listens on `transport` and starts out with the
    /// routes from `routes`. Its AS identifier is its listening port.
    pub fn new(
        transport: T,
        routes: &impl RouteSource,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        let address = transport.local_addr();
        let local_routes = routes.routes()?;
        Ok(Self {
            address,
            transport,
            table: RoutingTable::new(local_routes.iter().cloned(), config.policy),
            path_vector: PathVector::new(AsId(address.port())),
            reassembly: Reassembly::new(config.reassembly_expiry),
            local_routes,
            config,
            delivered: None,
            rng: SmallRng::seed_from_u64(address.port() as u64),
            shutdown: Shutdown::new(),
        })
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The active routing table.
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn path_vector(&self) -> &PathVector {
        &self.path_vector
    }

    /// Subscribes to the messages this router delivers from now on, in
    /// delivery order. Replaces any earlier subscription.
    pub fn deliveries(&mut self) -> UnboundedReceiver<Packet> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.delivered = Some(sender);
        receiver
    }

    /// The number of messages waiting on fragments.
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembly.pending_count()
    }

    fn fragments(&self) -> bool {
        self.config.fragmentation && self.config.framing.fragments()
    }

    /// Handles datagrams until `shutdown` fires. A path-vector run in
    /// progress converges early on the signal.
    pub async fn run(&mut self, shutdown: Shutdown) -> Result<(), RouterError> {
        self.shutdown = shutdown;
        tracing::info!(router = %self.address, "Listening");
        loop {
            let datagram = tokio::select! {
                _ = self.shutdown.wait_for_shutdown() => break,
                datagram = self.transport.recv() => datagram?,
            };
            self.handle(&datagram).await?;
        }
        tracing::info!(router = %self.address, "Shut down");
        Ok(())
    }

    /// Waits for one datagram and handles it.
    pub async fn step(&mut self) -> Result<Outcome, RouterError> {
        let datagram = self.transport.recv().await?;
        self.handle(&datagram).await
    }

    /// Applies the dispatch rules to one datagram.
    pub async fn handle(&mut self, datagram: &[u8]) -> Result<Outcome, RouterError> {
        let packet = match self.config.framing.decode(datagram, self.config.time_to_live) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(router = %self.address, "Dropping malformed datagram: {e}");
                return Ok(Outcome::Dropped(DropReason::Malformed(e)));
            }
        };
        tracing::trace!(router = %self.address, "Received {packet}");

        if is_hello(&packet.payload) {
            self.run_path_vector().await?;
            return Ok(Outcome::PathVectorRun);
        }

        if packet.time_to_live == 0 {
            tracing::info!(
                router = %self.address,
                destination = %packet.destination_address(),
                "TTL expired, dropping packet"
            );
            return Ok(Outcome::Dropped(DropReason::TtlExpired));
        }

        if packet.destination_address() == self.address {
            return Ok(self.deliver(packet));
        }

        Ok(self.forward(packet).await)
    }

    fn deliver(&mut self, packet: Packet) -> Outcome {
        if Advertisement::from_payload(&packet.payload).is_ok() {
            tracing::debug!(router = %self.address, "Ignoring advertisement outside a protocol run");
            return Outcome::Dropped(DropReason::StaleAdvertisement);
        }

        let packet = if self.fragments() {
            let now = Instant::now();
            for id in self.reassembly.evict_expired(now) {
                tracing::warn!(router = %self.address, fragment_id = id, "Abandoning incomplete message");
            }
            let fragment_id = packet.fragment_id;
            match self.reassembly.add_fragment(packet, now) {
                AddFragmentResult::Complete(packet) => packet,
                AddFragmentResult::Incomplete(buffered) => {
                    tracing::debug!(router = %self.address, fragment_id, buffered, "Buffered fragment");
                    return Outcome::Buffered {
                        fragment_id,
                        buffered,
                    };
                }
            }
        } else {
            packet
        };

        tracing::info!(
            router = %self.address,
            "Message received: {}",
            String::from_utf8_lossy(&packet.payload)
        );
        let unsubscribed = self
            .delivered
            .as_ref()
            .map_or(false, |delivered| delivered.send(packet.clone()).is_err());
        if unsubscribed {
            self.delivered = None;
        }
        Outcome::Delivered(packet)
    }

    async fn forward(&mut self, mut packet: Packet) -> Outcome {
        let destination = packet.destination_address();
        let Some(next_hop) = self.table.lookup(destination) else {
            tracing::info!(router = %self.address, %destination, "No route, dropping packet");
            return Outcome::Dropped(DropReason::NoRoute(destination));
        };

        packet.time_to_live -= 1;
        let packets = match next_hop.mtu.filter(|_| self.fragments()) {
            Some(mtu) => match fragment(packet, mtu) {
                Fragments::Discard => {
                    tracing::warn!(router = %self.address, mtu, "MTU too small, dropping packet");
                    return Outcome::Dropped(DropReason::MtuTooSmall(mtu));
                }
                Fragments::OffsetOverflow => {
                    tracing::warn!(
                        router = %self.address,
                        %destination,
                        "Fragment offset overflows, dropping packet"
                    );
                    return Outcome::Dropped(DropReason::OffsetOverflow);
                }
                fragments => fragments.into_packets(),
            },
            None => vec![packet],
        };

        tracing::debug!(
            router = %self.address,
            %destination,
            next_hop = %next_hop.address,
            fragments = packets.len(),
            "Forwarding"
        );
        for packet in packets.iter() {
            self.send(packet, next_hop.address).await;
        }
        Outcome::Forwarded {
            next_hop: next_hop.address,
            fragments: packets.len(),
        }
    }

    async fn send(&self, packet: &Packet, to: SocketAddrV4) {
        let datagram = self.config.framing.encode(packet);
        if let Err(e) = self.transport.send_to(&datagram, to).await {
            tracing::warn!(router = %self.address, "{e}");
        }
    }

    /// Sends a payload this router originates to a neighbor.
    async fn send_control(&mut self, to: SocketAddrV4, payload: Vec<u8>) {
        let id = self.rng.gen_range(0..CONTROL_ID_RANGE);
        let packet = Packet::new(to, self.config.time_to_live, id, payload);
        self.send(&packet, to).await;
    }

    async fn advertise(&mut self, neighbors: &[SocketAddrV4]) {
        let payload = self
            .path_vector
            .advertisement(self.address.port())
            .to_payload();
        for neighbor in neighbors {
            self.send_control(*neighbor, payload.clone()).await;
        }
    }

    /// Exchanges advertisements until no datagram arrives for the idle
    /// timeout or the router is shut down, then switches to the derived
    /// table.
    async fn run_path_vector(&mut self) -> Result<(), RouterError> {
        tracing::info!(router = %self.address, "Starting path-vector run");
        self.path_vector.start(&self.local_routes);
        self.reassembly.clear();

        let neighbors = neighbors(&self.local_routes);
        for neighbor in neighbors.iter() {
            self.send_control(*neighbor, HELLO.as_bytes().to_vec()).await;
        }
        self.advertise(&neighbors).await;

        loop {
            let received = tokio::select! {
                _ = self.shutdown.wait_for_shutdown() => {
                    tracing::info!(router = %self.address, "Shut down while converging");
                    break;
                }
                received = timeout(self.config.idle_timeout, self.transport.recv()) => received,
            };
            let Ok(datagram) = received else { break };
            let packet = match self.config.framing.decode(&datagram?, self.config.time_to_live) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!(router = %self.address, "Dropping malformed datagram: {e}");
                    continue;
                }
            };
            if is_hello(&packet.payload) {
                continue;
            }
            match Advertisement::from_payload(&packet.payload) {
                Ok(advertisement) => {
                    tracing::debug!(
                        router = %self.address,
                        sender = advertisement.sender,
                        paths = advertisement.paths.len(),
                        "Received advertisement"
                    );
                    if self.path_vector.receive(&advertisement) {
                        self.advertise(&neighbors).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(router = %self.address, "Dropping packet while converging: {e}")
                }
            }
        }

        self.converge()
    }

    fn converge(&mut self) -> Result<(), RouterError> {
        debug_assert_eq!(self.path_vector.state(), PathVectorState::Converging);
        let derived = self.path_vector.derive_routes(
            &self.local_routes,
            Ipv4Addr::LOCALHOST,
            self.config.derived_mtu,
        );
        if let Some(dir) = &self.config.derived_table_dir {
            let path = dir.join(format!("BGP_{}.txt", self.address.port()));
            write_routes(&path, &derived).map_err(|source| RouterError::Persist {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(router = %self.address, "Wrote derived table to {path:?}");
        }
        self.table.replace(derived);
        self.path_vector.finish();
        tracing::info!(
            router = %self.address,
            routes = self.table.len(),
            "Path-vector run converged"
        );
        Ok(())
    }
}
