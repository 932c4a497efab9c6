//! Launches routers on UDP sockets and injects packets into them.

use asroute_core::{
    router::RouterError,
    transport::{Transport, TransportError},
    Framing, Packet, RouteFile, RouteFormat, Router, RouterConfig, Shutdown, UdpTransport,
};
use futures::future::join_all;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error as ThisError;
use tokio::task::JoinError;

/// Replaced by a router's number in route file patterns
pub const ROUTER_NUMBER: &str = "{i}";

/// One router to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSpec {
    pub address: SocketAddrV4,
    pub routes: RouteFile,
}

/// Lays out `count` routers on the loopback address. Router `i`, counting
/// from 1, listens on `base_port + i` and reads its routes from `pattern`
/// with `{i}` replaced by `i`.
pub fn numbered(
    count: u16,
    base_port: u16,
    pattern: &str,
    format: RouteFormat,
) -> Result<Vec<RouterSpec>, TopologyError> {
    if count > 1 && !pattern.contains(ROUTER_NUMBER) {
        Err(TopologyError::MissingPlaceholder(pattern.to_string()))?
    }
    (1..=count)
        .map(|i| {
            let port = base_port
                .checked_add(i)
                .ok_or(TopologyError::PortOverflow { base_port, count })?;
            Ok(RouterSpec {
                address: SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
                routes: RouteFile::new(pattern.replace(ROUTER_NUMBER, &i.to_string()), format),
            })
        })
        .collect()
}

/// Binds every router, then runs them all until `shutdown` fires. A router
/// that fails shuts the others down.
pub async fn run_topology(
    specs: Vec<RouterSpec>,
    config: RouterConfig,
    shutdown: Shutdown,
) -> Result<(), TopologyError> {
    let mut routers = Vec::with_capacity(specs.len());
    for spec in specs {
        let transport = UdpTransport::bind(spec.address).await.map_err(RouterError::from)?;
        routers.push(Router::new(transport, &spec.routes, config.clone())?);
    }
    tracing::info!("Starting {} routers", routers.len());

    let handles = routers.into_iter().map(|mut router| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = router.run(shutdown.clone()).await;
            if let Err(e) = &result {
                tracing::error!(router = %router.address(), "Router stopped: {e}");
                shutdown.shut_down();
            }
            result
        })
    });
    for result in join_all(handles).await {
        result??;
    }
    Ok(())
}

/// Sends one packet to the router at `to` from an ephemeral socket.
pub async fn inject(to: SocketAddrV4, packet: &Packet, framing: Framing) -> Result<(), TransportError> {
    let transport = UdpTransport::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    tracing::debug!("Sending {packet} to {to}");
    transport.send_to(&framing.encode(packet), to).await
}

#[derive(Debug, ThisError)]
pub enum TopologyError {
    #[error("The route file pattern '{0}' needs a {{i}} placeholder for several routers")]
    MissingPlaceholder(String),
    #[error("{count} routers starting after port {base_port} run out of ports")]
    PortOverflow { base_port: u16, count: u16 },
    #[error("{0}")]
    Router(#[from] RouterError),
    #[error("A router task failed: {0}")]
    Task(#[from] JoinError),
}
