//! The table consulted for every packet not addressed to the router itself.

use crate::{
    fragmentation::Mtu,
    routes::{PortRange, RouteEntry},
};
use std::{collections::VecDeque, net::SocketAddrV4, str::FromStr};

/// How a destination is matched against the table's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LookupPolicy {
    /// The entry's destination address and single port equal the packet's
    #[default]
    Exact,
    /// The packet's port falls in the entry's range. A matching entry is moved
    /// to the back of the table so that entries serving the same destination
    /// take turns.
    RangeRotate,
}

impl FromStr for LookupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(LookupPolicy::Exact),
            "range-rotate" => Ok(LookupPolicy::RangeRotate),
            other => Err(format!("unknown lookup policy '{other}'")),
        }
    }
}

/// The result of a successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NextHop {
    pub address: SocketAddrV4,
    pub mtu: Option<Mtu>,
}

impl From<&RouteEntry> for NextHop {
    fn from(route: &RouteEntry) -> Self {
        Self {
            address: route.next_hop,
            mtu: route.mtu,
        }
    }
}

/// An ordered set of routes with a lookup policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: VecDeque<RouteEntry>,
    policy: LookupPolicy,
}

impl RoutingTable {
    pub fn new(routes: impl IntoIterator<Item = RouteEntry>, policy: LookupPolicy) -> Self {
        Self {
            routes: routes.into_iter().collect(),
            policy,
        }
    }

    /// Finds the next hop for a destination. `None` means there is no route,
    /// which callers report and drop rather than treat as a failure.
    pub fn lookup(&mut self, destination: SocketAddrV4) -> Option<NextHop> {
        let address = *destination.ip();
        let port = destination.port();
        match self.policy {
            LookupPolicy::Exact => self
                .routes
                .iter()
                .find(|route| route.destination == address && route.ports == PortRange::exact(port))
                .map(NextHop::from),
            LookupPolicy::RangeRotate => {
                let index = self
                    .routes
                    .iter()
                    .position(|route| route.destination == address && route.ports.contains(port))?;
                let route = self.routes.remove(index)?;
                let next_hop = NextHop::from(&route);
                self.routes.push_back(route);
                Some(next_hop)
            }
        }
    }

    /// Swaps in a new set of routes, keeping the lookup policy.
    pub fn replace(&mut self, routes: impl IntoIterator<Item = RouteEntry>) {
        self.routes = routes.into_iter().collect();
    }

    /// The routes in their current iteration order.
    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter()
    }

    pub fn policy(&self) -> LookupPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
