//! A simplified path-vector protocol in the spirit of BGP.
//!
//! Each router knows one AS path per origin. Paths arrive in advertisements
//! from neighbors; a path that already names the receiving router is
//! dropped, every other path is extended with the receiver's identifier and
//! kept if no path for its origin is known yet or if it is strictly shorter
//! than the known one. Equal length paths never replace each other, so the
//! first shortest path seen wins and the table stops changing once every
//! router has heard every shortest path.
//!
//! Advertisements travel as packet payloads of newline separated lines:
//!
//! ```text
//! BGP_ROUTES
//! <sender port>
//! <AS path>
//! ...
//! END_ROUTES
//! ```

use crate::{
    as_path::{AsId, AsPath, AsPathError},
    fragmentation::Mtu,
    routes::RouteEntry,
};
use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};
use thiserror::Error as ThisError;

/// The payload that starts the protocol on a router
pub const HELLO: &str = "START_BGP";
/// First line of an advertisement
pub const ROUTES_HEADER: &str = "BGP_ROUTES";
/// Last line of an advertisement
pub const ROUTES_TERMINATOR: &str = "END_ROUTES";
/// How long a converging router waits for another advertisement before it
/// considers the protocol converged
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// The MTU written into derived routes
pub const DERIVED_MTU: Mtu = 1000;

/// Whether a payload asks the router to run the protocol.
pub fn is_hello(payload: &[u8]) -> bool {
    std::str::from_utf8(payload)
        .map(|text| text.trim() == HELLO)
        .unwrap_or(false)
}

/// The reachability a router announces to its neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// The listening port of the advertising router
    pub sender: u16,
    pub paths: Vec<AsPath>,
}

impl Advertisement {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut lines = vec![ROUTES_HEADER.to_string(), self.sender.to_string()];
        lines.extend(self.paths.iter().map(AsPath::to_string));
        lines.push(ROUTES_TERMINATOR.to_string());
        lines.join("\n").into_bytes()
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, AdvertisementError> {
        let text = std::str::from_utf8(payload).or(Err(AdvertisementError::NonUtf8))?;
        let mut lines = text.lines();
        if lines.next() != Some(ROUTES_HEADER) {
            Err(AdvertisementError::MissingHeader)?
        }
        let sender_line = lines.next().ok_or(AdvertisementError::MissingTerminator)?;
        let sender = sender_line
            .trim()
            .parse()
            .or_else(|_| Err(AdvertisementError::InvalidSender(sender_line.to_string())))?;
        if lines.next_back() != Some(ROUTES_TERMINATOR) {
            Err(AdvertisementError::MissingTerminator)?
        }
        let paths = lines
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<AsPath>, _>>()?;
        Ok(Self { sender, paths })
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum AdvertisementError {
    #[error("The advertisement is not valid UTF-8")]
    NonUtf8,
    #[error("Expected the advertisement to start with BGP_ROUTES")]
    MissingHeader,
    #[error("Expected the advertisement to end with END_ROUTES")]
    MissingTerminator,
    #[error("'{0}' is not a valid sender port")]
    InvalidSender(String),
    #[error("{0}")]
    Path(#[from] AsPathError),
}

/// Where a router is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathVectorState {
    /// Nothing has been learned; the table has not been seeded
    Init,
    /// Exchanging advertisements until the network goes quiet
    Converging,
    /// The learned paths have been turned into the active routing table
    Converged,
}

/// One router's view of the AS paths in the network.
#[derive(Debug, Clone)]
pub struct PathVector {
    local: AsId,
    /// At most one path per origin, in the order origins were first learned
    paths: Vec<AsPath>,
    state: PathVectorState,
}

impl PathVector {
    pub fn new(local: AsId) -> Self {
        Self {
            local,
            paths: vec![],
            state: PathVectorState::Init,
        }
    }

    pub fn local(&self) -> AsId {
        self.local
    }

    pub fn state(&self) -> PathVectorState {
        self.state
    }

    pub fn paths(&self) -> &[AsPath] {
        &self.paths
    }

    /// The path currently selected for an origin.
    pub fn path_to(&self, origin: AsId) -> Option<&AsPath> {
        self.paths.iter().find(|path| path.origin() == origin)
    }

    /// Seeds the table from the router's own AS path routes and enters
    /// [`PathVectorState::Converging`]. Restarting a converged router keeps
    /// what it has learned.
    pub fn start(&mut self, local_routes: &[RouteEntry]) {
        if self.state == PathVectorState::Init {
            for as_path in local_routes.iter().filter_map(|route| route.as_path.clone()) {
                self.select(as_path);
            }
        }
        self.state = PathVectorState::Converging;
    }

    /// Marks the protocol as converged.
    pub fn finish(&mut self) {
        self.state = PathVectorState::Converged;
    }

    /// The advertisement of every known path.
    pub fn advertisement(&self, sender: u16) -> Advertisement {
        Advertisement {
            sender,
            paths: self.paths.clone(),
        }
    }

    /// Learns from a neighbor's advertisement. Returns whether any selected
    /// path was added or replaced, in which case the new table should be
    /// advertised to every neighbor.
    pub fn receive(&mut self, advertisement: &Advertisement) -> bool {
        let mut modified = false;
        for path in advertisement.paths.iter() {
            if path.contains(self.local) {
                continue;
            }
            modified |= self.select(path.extended(self.local));
        }
        modified
    }

    /// Adopts `path` if its origin is unknown or it is strictly shorter than
    /// the selected path for that origin.
    fn select(&mut self, path: AsPath) -> bool {
        match self
            .paths
            .iter()
            .position(|known| known.origin() == path.origin())
        {
            Some(index) if path.len() < self.paths[index].len() => {
                tracing::debug!(local = %self.local, old = %self.paths[index], new = %path, "Replacing path");
                self.paths[index] = path;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(local = %self.local, new = %path, "Learned path");
                self.paths.push(path);
                true
            }
        }
    }

    /// Turns the learned paths into forwarding routes.
    ///
    /// A path's previous hop is the neighbor it was learned from. The route
    /// for the path's origin uses the next hop of the local route whose AS
    /// path starts at that neighbor. Paths whose neighbor has no local route
    /// cannot be forwarded over and are left out.
    pub fn derive_routes(
        &self,
        local_routes: &[RouteEntry],
        destination: Ipv4Addr,
        mtu: Mtu,
    ) -> Vec<RouteEntry> {
        let mut derived = Vec::with_capacity(self.paths.len());
        for path in self.paths.iter() {
            let Some(neighbor) = path.previous_hop() else {
                tracing::warn!(local = %self.local, path = %path, "Path has no previous hop");
                continue;
            };
            let Some(route) = local_routes
                .iter()
                .find(|route| route.origin() == Some(neighbor))
            else {
                tracing::warn!(local = %self.local, path = %path, "No local route to neighbor {neighbor}");
                continue;
            };
            derived.push(RouteEntry::with_as_path(
                destination,
                path.clone(),
                route.next_hop,
                mtu,
            ));
        }
        derived
    }
}

/// The protocol neighbors of a router: the distinct next hops of its own
/// routes, in table order.
pub fn neighbors(local_routes: &[RouteEntry]) -> Vec<SocketAddrV4> {
    let mut neighbors: Vec<SocketAddrV4> = Vec::new();
    for route in local_routes {
        if !neighbors.contains(&route.next_hop) {
            neighbors.push(route.next_hop);
        }
    }
    neighbors
}
