use asroute::cli::initialize_from_arguments;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eprintln!("asroute v{}", env!("CARGO_PKG_VERSION"));
    initialize_from_arguments().await
}
