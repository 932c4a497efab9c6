use super::{localhost, router};
use anyhow::ensure;
use asroute_core::{
    router::DropReason, MemoryNetwork, Outcome, Packet, RouteFormat, RouterConfig,
};

/// Two misconfigured routers that point at each other for the same
/// destination. A packet bounces between them until its TTL runs out.
pub async fn ttl_exhaustion() -> anyhow::Result<()> {
    let network = MemoryNetwork::new();
    let config = RouterConfig::default();
    let format = RouteFormat::PortRange;
    let mut routers = [
        router(&network, 8881, "127.0.0.1 8889 8889 127.0.0.1 8882", format, config.clone())?,
        router(&network, 8882, "127.0.0.1 8889 8889 127.0.0.1 8881", format, config)?,
    ];

    let ttl = 5;
    network.inject(localhost(8881), Packet::new(localhost(8889), ttl, 0, "lost").to_bytes());

    let mut forwards = 0;
    for turn in 0.. {
        let router = &mut routers[turn % 2];
        match router.step().await? {
            Outcome::Forwarded { .. } => forwards += 1,
            Outcome::Dropped(DropReason::TtlExpired) => {
                ensure!(router.address() == localhost(8882));
                break;
            }
            other => anyhow::bail!("Unexpected outcome {other:?}"),
        }
    }
    ensure!(forwards == ttl, "Expected {ttl} forwards, got {forwards}");
    Ok(())
}
