//! Parses the command line arguments.
//!
//! Running three routers whose route files are `rutas/rutas_R1.txt` to
//! `rutas/rutas_R3.txt`, then starting the path-vector protocol on the
//! first one:
//!
//! ```text
//! asroute topology --count 3 --routes 'rutas/rutas_R{i}.txt'
//! asroute send 127.0.0.1:8881 --destination 127.0.0.1:8881 START_BGP
//! ```

use crate::{
    logging::initialize_logging,
    topology::{inject, numbered, run_topology, RouterSpec},
};
use anyhow::Context;
use asroute_core::{
    packet::DEFAULT_TTL, Framing, LookupPolicy, Packet, RouteFile, RouteFormat, RouterConfig,
    Shutdown,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::{net::SocketAddrV4, path::PathBuf, time::Duration};

/// Stores the different command line arguments.
#[derive(Parser)]
#[command(version, about = "Path-vector router simulator")]
struct Args {
    /// Also write JSON events to ./logs
    #[arg(short, long, global = true)]
    log: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs a single router
    Router {
        /// The address to listen on. Its port is the router's AS identifier.
        #[arg(long, default_value = "127.0.0.1:8881")]
        listen: SocketAddrV4,
        /// The router's route file
        #[arg(long)]
        routes: PathBuf,
        #[command(flatten)]
        options: RouterOptions,
    },
    /// Runs several routers in one process, each on its own port
    Topology {
        /// The number of routers
        #[arg(short, long)]
        count: u16,
        /// Router i listens on this port plus i
        #[arg(long, default_value_t = 8880)]
        base_port: u16,
        /// Route file path, with {i} standing for the router number
        #[arg(long, default_value = "rutas/rutas_R{i}.txt")]
        routes: String,
        #[command(flatten)]
        options: RouterOptions,
    },
    /// Sends one packet to a router
    Send {
        /// The router to hand the packet to
        to: SocketAddrV4,
        /// The packet's payload. START_BGP starts the path-vector protocol.
        payload: String,
        /// The packet's destination. Defaults to the router it is sent to.
        #[arg(short, long)]
        destination: Option<SocketAddrV4>,
        #[arg(long, default_value_t = DEFAULT_TTL)]
        ttl: u8,
        #[arg(long, default_value_t = 0)]
        fragment_id: u16,
        /// fragmenting or basic
        #[arg(long, default_value = "fragmenting")]
        framing: Framing,
    },
}

#[derive(ClapArgs)]
struct RouterOptions {
    /// The route file layout: as-path or port-range
    #[arg(long, default_value = "as-path")]
    format: RouteFormat,
    /// The wire framing: fragmenting or basic
    #[arg(long, default_value = "fragmenting")]
    framing: Framing,
    /// How routes are matched: exact or range-rotate
    #[arg(long, default_value = "exact")]
    policy: LookupPolicy,
    /// Forward packets whole regardless of next hop MTUs
    #[arg(long)]
    no_fragmentation: bool,
    /// Seconds without advertisements before the protocol converges
    #[arg(long, default_value_t = 10.0)]
    idle_timeout: f64,
    /// Seconds an incomplete message is kept without new fragments
    #[arg(long, default_value_t = 15.0)]
    reassembly_expiry: f64,
    /// Where derived tables are written
    #[arg(long, default_value = "rutas")]
    derived_dir: PathBuf,
    /// Keep derived tables in memory only
    #[arg(long)]
    no_derived_files: bool,
}

impl RouterOptions {
    fn config(&self) -> anyhow::Result<RouterConfig> {
        Ok(RouterConfig {
            framing: self.framing,
            policy: self.policy,
            fragmentation: !self.no_fragmentation,
            idle_timeout: seconds(self.idle_timeout).context("Invalid idle timeout")?,
            reassembly_expiry: seconds(self.reassembly_expiry)
                .context("Invalid reassembly expiry")?,
            derived_table_dir: (!self.no_derived_files).then(|| self.derived_dir.clone()),
            ..Default::default()
        })
    }
}

fn seconds(value: f64) -> anyhow::Result<Duration> {
    Ok(Duration::try_from_secs_f64(value)?)
}

/// Parses command line arguments and runs the selected command.
pub async fn initialize_from_arguments() -> anyhow::Result<()> {
    let cli = Args::parse();
    initialize_logging(cli.log)?;

    match cli.command {
        Command::Router {
            listen,
            routes,
            options,
        } => {
            let spec = RouterSpec {
                address: listen,
                routes: RouteFile::new(routes, options.format),
            };
            run(vec![spec], options.config()?).await
        }
        Command::Topology {
            count,
            base_port,
            routes,
            options,
        } => {
            let specs = numbered(count, base_port, &routes, options.format)?;
            run(specs, options.config()?).await
        }
        Command::Send {
            to,
            payload,
            destination,
            ttl,
            fragment_id,
            framing,
        } => {
            let packet = Packet::new(destination.unwrap_or(to), ttl, fragment_id, payload);
            inject(to, &packet, framing).await?;
            Ok(())
        }
    }
}

/// Runs routers until interrupted.
async fn run(specs: Vec<RouterSpec>, config: RouterConfig) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, shutting down");
            }
            shutdown.shut_down();
        }
    });
    run_topology(specs, config, shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn router_options_build_config() {
        let args = Args::parse_from([
            "asroute",
            "topology",
            "--count",
            "3",
            "--policy",
            "range-rotate",
            "--format",
            "port-range",
            "--idle-timeout",
            "0.5",
            "--no-derived-files",
        ]);
        let Command::Topology { count, options, .. } = args.command else {
            panic!("Expected the topology command");
        };
        assert_eq!(count, 3);
        assert_eq!(options.format, RouteFormat::PortRange);
        let config = options.config().unwrap();
        assert_eq!(config.policy, LookupPolicy::RangeRotate);
        assert_eq!(config.framing, Framing::Fragmenting);
        assert_eq!(config.idle_timeout, Duration::from_millis(500));
        assert_eq!(config.derived_table_dir, None);
        assert!(config.fragmentation);
    }

    #[test]
    fn rejects_negative_timeouts() {
        let args = Args::parse_from([
            "asroute",
            "router",
            "--routes",
            "r.txt",
            "--idle-timeout=-1",
        ]);
        let Command::Router { options, .. } = args.command else {
            panic!("Expected the router command");
        };
        assert!(options.config().is_err());
        assert_eq!(options.derived_dir, PathBuf::from("rutas"));
    }
}
