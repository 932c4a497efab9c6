use super::{localhost, next_delivery, router, spawn, stop};
use anyhow::{ensure, Context};
use asroute_core::{
    path_vector::HELLO, AsId, AsPath, MemoryNetwork, Packet, PathVectorState, RouteFormat,
    RouterConfig, Shutdown,
};
use std::time::Duration;

/// Three routers in a line, each knowing only its neighbors. A hello to the
/// first router starts the protocol everywhere. Once the network has been
/// quiet for the idle timeout, the ends can reach each other over the
/// derived tables.
pub async fn path_vector_convergence() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let shutdown = Shutdown::new();
    let idle_timeout = Duration::from_millis(300);
    let config = RouterConfig {
        idle_timeout,
        ..Default::default()
    };
    let format = RouteFormat::AsPath;

    let mut last = router(
        &network,
        8883,
        "127.0.0.1 8882 8883 127.0.0.1 8882 1000",
        format,
        config.clone(),
    )?;
    let mut deliveries = last.deliveries();
    let tasks = vec![
        spawn(
            router(
                &network,
                8881,
                "127.0.0.1 8882 8881 127.0.0.1 8882 1000",
                format,
                config.clone(),
            )?,
            &shutdown,
        ),
        spawn(
            router(
                &network,
                8882,
                "127.0.0.1 8881 8882 127.0.0.1 8881 1000\n\
                 127.0.0.1 8883 8882 127.0.0.1 8883 1000",
                format,
                config,
            )?,
            &shutdown,
        ),
        spawn(last, &shutdown),
    ];

    network.inject(localhost(8881), Packet::new(localhost(8881), 20, 0, HELLO).to_bytes());
    // Every router goes quiet within a few idle periods of the hello
    tokio::time::sleep(idle_timeout * 4).await;

    let packet = Packet::new(localhost(8883), 20, 1, "across the network");
    network.inject(localhost(8881), packet.to_bytes());
    let delivered = next_delivery(&mut deliveries).await?;
    ensure!(delivered.payload == b"across the network");
    ensure!(delivered.time_to_live == 18);

    let routers = stop(shutdown, tasks).await?;
    for router in routers.iter() {
        ensure!(router.path_vector().state() == PathVectorState::Converged);
        ensure!(router.table().len() == 2, "{} has the wrong table", router.address());
    }
    let first = routers[0].path_vector();
    let path = first.path_to(AsId(8883)).context("8881 never learned 8883")?;
    ensure!(*path == "8883 8882 8881".parse::<AsPath>()?);
    tracing::info!("All routers converged, 8881 reaches 8883 over {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[tracing_test::traced_test]
    async fn path_vector_convergence() {
        super::path_vector_convergence().await.unwrap();
        assert!(logs_contain("All routers converged"));
    }
}
