use std::future::Future;

fn run(simulation: impl Future<Output = anyhow::Result<()>>) {
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(simulation)
        .unwrap()
}

#[test]
#[ntest::timeout(10000)]
fn forwarding_chain() {
    run(asroute::simulations::forwarding_chain())
}

#[test]
#[ntest::timeout(10000)]
fn fragmenting_chain() {
    run(asroute::simulations::fragmenting_chain())
}

#[test]
#[ntest::timeout(10000)]
fn ttl_exhaustion() {
    run(asroute::simulations::ttl_exhaustion())
}

#[test]
#[ntest::timeout(10000)]
fn path_vector_convergence() {
    run(asroute::simulations::path_vector_convergence())
}
