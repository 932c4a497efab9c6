use super::{localhost, next_delivery, router, spawn, stop};
use anyhow::ensure;
use asroute_core::{LookupPolicy, MemoryNetwork, Packet, RouteFormat, RouterConfig, Shutdown};

/// Sends two messages across a network with a short and a long path to the
/// destination.
///
/// ```text
///        8882
///      /      \
/// 8881          8884
///      \      /
///  8883 - 8885
/// ```
///
/// The first router has a range route over each path and takes turns
/// between them, which the remaining TTL of each delivered message shows.
pub async fn forwarding_chain() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let shutdown = Shutdown::new();
    let config = RouterConfig {
        policy: LookupPolicy::RangeRotate,
        ..Default::default()
    };
    let format = RouteFormat::PortRange;

    let mut destination = router(&network, 8884, "", format, config.clone())?;
    let mut deliveries = destination.deliveries();
    let tasks = vec![
        spawn(
            router(
                &network,
                8881,
                "127.0.0.1 8884 8890 127.0.0.1 8882\n\
                 127.0.0.1 8884 8890 127.0.0.1 8883",
                format,
                config.clone(),
            )?,
            &shutdown,
        ),
        spawn(
            router(&network, 8882, "127.0.0.1 8884 8884 127.0.0.1 8884", format, config.clone())?,
            &shutdown,
        ),
        spawn(
            router(&network, 8883, "127.0.0.1 8884 8884 127.0.0.1 8885", format, config.clone())?,
            &shutdown,
        ),
        spawn(
            router(&network, 8885, "127.0.0.1 8884 8884 127.0.0.1 8884", format, config)?,
            &shutdown,
        ),
        spawn(destination, &shutdown),
    ];

    let mut hops = vec![];
    for message in ["first message", "second message"] {
        let packet = Packet::new(localhost(8884), 20, 0, message);
        network.inject(localhost(8881), packet.to_bytes());
        let delivered = next_delivery(&mut deliveries).await?;
        ensure!(delivered.payload == message.as_bytes(), "Wrong message delivered");
        hops.push(20 - delivered.time_to_live);
    }
    // Short path first, then the long one
    ensure!(hops == [2, 3], "Expected the routes to take turns, got hop counts {hops:?}");

    stop(shutdown, tasks).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn forwarding_chain() {
        super::forwarding_chain().await.unwrap()
    }
}
