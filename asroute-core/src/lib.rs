//! Building blocks for simulated path-vector routers that exchange
//! comma separated text packets over UDP.
//!
//! # Organization
//! - [`packet`] encodes and decodes the wire framings
//! - [`fragmentation`] and [`reassembly`] split packets to fit a link's MTU
//!   and put them back together at the destination
//! - [`routes`] and [`routing_table`] load route files and resolve next hops
//! - [`path_vector`] learns AS paths from neighbor advertisements and turns
//!   them into routes
//! - [`transport`] and [`network`] move datagrams, over real UDP sockets or
//!   an in-process network
//! - [`Router`] ties the pieces together in a single receive loop
//!
//! Routers share no state. Everything one router learns about another
//! arrives as a datagram.

pub mod as_path;
pub use as_path::{AsId, AsPath};

pub mod fragmentation;
pub use fragmentation::{fragment, Fragments, Mtu};

pub mod network;
pub use network::{MemoryNetwork, MemoryTransport};

pub mod packet;
pub use packet::{Framing, Packet};

pub mod path_vector;
pub use path_vector::{PathVector, PathVectorState};

pub mod reassembly;
pub use reassembly::Reassembly;

pub mod router;
pub use router::{Outcome, Router, RouterConfig};

pub mod routes;
pub use routes::{RouteEntry, RouteFile, RouteFormat, RouteSource};

pub mod routing_table;
pub use routing_table::{LookupPolicy, RoutingTable};

mod shutdown;
pub use shutdown::Shutdown;

pub mod transport;
pub use transport::{Transport, UdpTransport};
