use asroute_core::{
    fragment,
    reassembly::{AddFragmentResult, Reassembly},
    LookupPolicy, MemoryNetwork, Packet, RouteFormat, Router, RouterConfig,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::{runtime::Runtime, time::Instant};

fn message() -> Packet {
    let payload: Vec<u8> = (0..16_384u32).map(|i| (i % 251) as u8).collect();
    Packet::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8883), 20, 42, payload)
}

fn fragment_and_reassemble(c: &mut Criterion) {
    c.bench_function("fragment 16 KiB to MTU 1000", |b| {
        b.iter_batched(message, |packet| fragment(packet, 1000), BatchSize::SmallInput)
    });

    c.bench_function("reassemble 16 KiB from MTU 1000", |b| {
        b.iter_batched(
            || fragment(message(), 1000).into_packets(),
            |fragments| {
                let mut reassembly = Reassembly::default();
                let now = Instant::now();
                for fragment in fragments.into_iter().rev() {
                    if let AddFragmentResult::Complete(packet) = reassembly.add_fragment(fragment, now) {
                        return Some(packet);
                    }
                }
                None
            },
            BatchSize::SmallInput,
        )
    });
}

fn forward(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let network = MemoryNetwork::new();
    let routes =
        asroute_core::routes::parse_routes("127.0.0.1 8882 8890 127.0.0.1 8882 1000", RouteFormat::PortRange)
            .unwrap();
    let config = RouterConfig {
        policy: LookupPolicy::RangeRotate,
        ..Default::default()
    };
    let mut router = runtime.block_on(async {
        Router::new(
            network.attach(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8881)).unwrap(),
            &routes,
            config,
        )
        .unwrap()
    });
    let datagram = message().to_bytes();

    c.bench_function("forward 16 KiB over MTU 1000", |b| {
        b.iter(|| runtime.block_on(router.handle(&datagram)).unwrap())
    });
}

criterion_group!(benches, fragment_and_reassemble, forward);
criterion_main!(benches);
