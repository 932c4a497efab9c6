//! Prebuilt topologies run on an in-memory network, for testing and
//! examples.

mod forwarding_chain;
pub use forwarding_chain::forwarding_chain;

mod fragmenting_chain;
pub use fragmenting_chain::fragmenting_chain;

mod path_vector_convergence;
pub use path_vector_convergence::path_vector_convergence;

mod ttl_exhaustion;
pub use ttl_exhaustion::ttl_exhaustion;

use anyhow::Context;
use asroute_core::{
    routes::parse_routes, router::RouterError, MemoryNetwork, MemoryTransport, Packet,
    RouteFormat, Router, RouterConfig, Shutdown,
};
use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

/// How long a simulation waits for a message before giving up
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

type RouterTask = JoinHandle<Result<Router<MemoryTransport>, RouterError>>;

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn router(
    network: &MemoryNetwork,
    port: u16,
    routes: &str,
    format: RouteFormat,
    config: RouterConfig,
) -> anyhow::Result<Router<MemoryTransport>> {
    let routes = parse_routes(routes, format)?;
    Ok(Router::new(network.attach(localhost(port))?, &routes, config)?)
}

/// Runs a router on its own task. The task hands the router back once
/// `shutdown` fires.
fn spawn(mut router: Router<MemoryTransport>, shutdown: &Shutdown) -> RouterTask {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        router.run(shutdown).await?;
        Ok(router)
    })
}

/// Shuts the routers down and collects them.
async fn stop(
    shutdown: Shutdown,
    tasks: Vec<RouterTask>,
) -> anyhow::Result<Vec<Router<MemoryTransport>>> {
    shutdown.shut_down();
    let mut routers = Vec::with_capacity(tasks.len());
    for task in tasks {
        routers.push(task.await??);
    }
    Ok(routers)
}

async fn next_delivery(deliveries: &mut UnboundedReceiver<Packet>) -> anyhow::Result<Packet> {
    tokio::time::timeout(DELIVERY_TIMEOUT, deliveries.recv())
        .await
        .context("Timed out waiting for a delivery")?
        .context("The router stopped delivering")
}
