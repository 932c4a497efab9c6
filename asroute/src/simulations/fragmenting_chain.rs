use super::{localhost, next_delivery, router, spawn, stop};
use anyhow::ensure;
use asroute_core::{MemoryNetwork, Packet, RouteFormat, RouterConfig, Shutdown};

/// Sends one large message along a chain of links with shrinking MTUs, so
/// that fragments are fragmented again on the way. The last router
/// reassembles the message.
pub async fn fragmenting_chain() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let shutdown = Shutdown::new();
    let config = RouterConfig::default();
    let format = RouteFormat::PortRange;

    let mut destination = router(&network, 8884, "", format, config.clone())?;
    let mut deliveries = destination.deliveries();
    let tasks = vec![
        spawn(
            router(&network, 8881, "127.0.0.1 8884 8884 127.0.0.1 8882 200", format, config.clone())?,
            &shutdown,
        ),
        spawn(
            router(&network, 8882, "127.0.0.1 8884 8884 127.0.0.1 8883 80", format, config.clone())?,
            &shutdown,
        ),
        spawn(
            router(&network, 8883, "127.0.0.1 8884 8884 127.0.0.1 8884 1000", format, config)?,
            &shutdown,
        ),
        spawn(destination, &shutdown),
    ];

    let mut message = String::with_capacity(500);
    let word = "bingus,";
    while message.len() + word.len() <= 500 {
        message.push_str(word);
    }
    let packet = Packet::new(localhost(8884), 20, 77, message.clone());
    network.inject(localhost(8881), packet.to_bytes());

    let delivered = next_delivery(&mut deliveries).await?;
    ensure!(delivered.payload == message.as_bytes(), "The message was corrupted");
    ensure!(delivered.size as usize == message.len());
    ensure!(delivered.fragment_id == 77);
    ensure!(delivered.time_to_live == 17);
    ensure!(!delivered.more_fragments);

    let routers = stop(shutdown, tasks).await?;
    ensure!(routers.iter().all(|router| router.pending_reassemblies() == 0));
    Ok(())
}
