//! # Helmsman CLI Entry Point
//!
//! Main binary of the helmsman global orchestrator. Runs an orchestrator
//! with its administrative API, or queries one that is already running.
//!
//! ## Usage
//!
//! ```bash
//! # Start an orchestrator backed by a config file
//! helmsman run -c orchestrator.json -b 0.0.0.0:8080
//!
//! # Start an orchestrator polling a service registry
//! helmsman run --registry http://registry.internal:7000
//!
//! # Query a running orchestrator
//! helmsman status http://127.0.0.1:8080
//! helmsman topology http://127.0.0.1:8080
//! helmsman metrics --json http://127.0.0.1:8080
//!
//! # Report a failed delivery to a node
//! helmsman outcome --failed http://127.0.0.1:8080 eu-1
//! ```
//!
//! ## URL Format
//!
//! All URLs must include the `http://` or `https://` prefix:
//! - ✅ `http://127.0.0.1:8080`
//! - ✅ `https://example.com:8080`
//! - ❌ `127.0.0.1:8080`

use anyhow::{bail, Result};
use argh::FromArgs;
use helmsman_cli::query::{render_health, render_metrics, render_topology, validate_http_url, AdminClient};
use helmsman_orchestrator::config::DiscoveryPatch;
use helmsman_orchestrator::{GlobalOrchestrator, HttpServer, OrchestratorConfigPatch};
use std::net::SocketAddr;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// Helmsman - global fleet orchestrator
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Run**: Start the orchestrator and serve its administrative API
/// - **Status**, **Topology**, **Metrics**: Query a running orchestrator
/// - **Outcome**: Report a delivery outcome to a running orchestrator
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Status(StatusArgs),
    Topology(TopologyArgs),
    Metrics(MetricsArgs),
    Outcome(OutcomeArgs),
}

/// Arguments for running an orchestrator.
///
/// The orchestrator loads its configuration from `--config` (writing the
/// defaults there if the file does not exist) and keeps watching the file
/// for changes. Without `--config` the configuration lives in memory.
///
/// # Example
///
/// ```bash
/// helmsman run -c /etc/helmsman/orchestrator.json -b 0.0.0.0:8080
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// start the orchestrator and its administrative API
struct RunArgs {
    /// path to the JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to bind the administrative API to
    ///
    /// Defaults to "0.0.0.0:8080".
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// service registry to poll for nodes, overriding the configuration
    ///
    /// Must include the http:// or https:// prefix.
    #[argh(option, long = "registry")]
    registry: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// show the health of a running orchestrator
struct StatusArgs {
    /// address of the orchestrator's administrative API
    #[argh(positional)]
    server_address: String,

    /// print the raw JSON response
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "topology")]
/// show the federations, nodes and failover groups of an orchestrator
struct TopologyArgs {
    /// address of the orchestrator's administrative API
    #[argh(positional)]
    server_address: String,

    /// print the raw JSON response
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "metrics")]
/// show the global metrics of an orchestrator
struct MetricsArgs {
    /// address of the orchestrator's administrative API
    #[argh(positional)]
    server_address: String,

    /// print the raw JSON response
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "outcome")]
/// report whether a message routed to a node was delivered
struct OutcomeArgs {
    /// address of the orchestrator's administrative API
    #[argh(positional)]
    server_address: String,

    /// id of the node the message was routed to
    #[argh(positional)]
    node_id: String,

    /// the delivery failed
    #[argh(switch)]
    failed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Query commands keep stdout clean for piping
    if matches!(cli.command, Commands::Run(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status(args) => {
            let client = AdminClient::new(&args.server_address)?;
            if args.json {
                println!("{}", serde_json::to_string(&client.raw("/health").await?)?);
                return Ok(());
            }
            let report = client.health().await?;
            print!("{}", render_health(&report));
            if !report.is_operational() {
                bail!("orchestrator {} is not operational", report.orchestrator_id);
            }
            Ok(())
        }
        Commands::Topology(args) => {
            let client = AdminClient::new(&args.server_address)?;
            if args.json {
                println!("{}", serde_json::to_string(&client.raw("/topology").await?)?);
            } else {
                print!("{}", render_topology(&client.topology().await?));
            }
            Ok(())
        }
        Commands::Metrics(args) => {
            let client = AdminClient::new(&args.server_address)?;
            if args.json {
                println!("{}", serde_json::to_string(&client.raw("/metrics").await?)?);
            } else {
                print!("{}", render_metrics(&client.metrics().await?));
            }
            Ok(())
        }
        Commands::Outcome(args) => {
            let client = AdminClient::new(&args.server_address)?;
            let success_rate = client.report_outcome(&args.node_id, !args.failed).await?;
            println!(
                "{}: {:.0}% of recent deliveries succeeded",
                args.node_id,
                success_rate * 100.0
            );
            Ok(())
        }
    }
}

/// Executes the `run` subcommand.
///
/// Starts every orchestrator service, serves the administrative API until
/// Ctrl-C, then stops the services again.
async fn run(args: RunArgs) -> Result<()> {
    if let Some(registry) = &args.registry {
        validate_http_url(registry, "registry address")?;
    }
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    let mut builder = GlobalOrchestrator::builder();
    if let Some(path) = &args.config {
        tracing::info!("Using configuration file {}", path);
        builder = builder.config_path(path);
    }
    let orchestrator = builder.build()?;
    orchestrator.start().await?;

    if let Some(registry) = args.registry {
        tracing::info!("Polling service registry {}", registry);
        let patch = OrchestratorConfigPatch {
            discovery: Some(DiscoveryPatch {
                service_registry_url: Some(registry),
                ..Default::default()
            }),
            ..Default::default()
        };
        if let Err(e) = orchestrator.update_configuration(&patch).await {
            orchestrator.stop().await;
            return Err(e.into());
        }
    }

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            orchestrator.stop().await;
            bail!("Failed to bind to {}: {}", addr, e);
        }
    };

    let served = HttpServer::new(orchestrator.clone())
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await;

    orchestrator.stop().await;
    served?;
    Ok(())
}

/// CLI argument parsing tests.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_defaults() {
        let args: Cli = Cli::from_args(&["helmsman"], &["run"]).unwrap();
        match args.command {
            Commands::Run(RunArgs { config, bind, registry }) => {
                assert!(config.is_none());
                assert_eq!(bind, "0.0.0.0:8080");
                assert!(registry.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_options() {
        let args: Cli = Cli::from_args(
            &["helmsman"],
            &[
                "run",
                "-c", "orchestrator.json",
                "-b", "127.0.0.1:9000",
                "--registry", "http://127.0.0.1:7000",
            ],
        )
        .unwrap();
        match args.command {
            Commands::Run(RunArgs { config, bind, registry }) => {
                assert_eq!(config.as_deref(), Some("orchestrator.json"));
                assert_eq!(bind, "127.0.0.1:9000");
                assert_eq!(registry.as_deref(), Some("http://127.0.0.1:7000"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_status() {
        let args: Cli = Cli::from_args(&["helmsman"], &["status", "http://127.0.0.1:8080"]).unwrap();
        match args.command {
            Commands::Status(StatusArgs { server_address, json }) => {
                assert_eq!(server_address, "http://127.0.0.1:8080");
                assert!(!json);
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_parse_topology_json() {
        let args: Cli =
            Cli::from_args(&["helmsman"], &["topology", "--json", "http://127.0.0.1:8080"]).unwrap();
        match args.command {
            Commands::Topology(TopologyArgs { server_address, json }) => {
                assert_eq!(server_address, "http://127.0.0.1:8080");
                assert!(json);
            }
            _ => panic!("Expected Topology command"),
        }
    }

    #[test]
    fn test_cli_parse_metrics() {
        let args: Cli = Cli::from_args(&["helmsman"], &["metrics", "http://127.0.0.1:8080"]).unwrap();
        assert!(matches!(args.command, Commands::Metrics(_)));
    }

    #[test]
    fn test_cli_parse_outcome() {
        let args: Cli = Cli::from_args(
            &["helmsman"],
            &["outcome", "--failed", "http://127.0.0.1:8080", "eu-1"],
        )
        .unwrap();
        match args.command {
            Commands::Outcome(OutcomeArgs { server_address, node_id, failed }) => {
                assert_eq!(server_address, "http://127.0.0.1:8080");
                assert_eq!(node_id, "eu-1");
                assert!(failed);
            }
            _ => panic!("Expected Outcome command"),
        }
        assert!(Cli::from_args(&["helmsman"], &["outcome", "http://127.0.0.1:8080"]).is_err());
    }

    #[test]
    fn test_cli_requires_server_address() {
        assert!(Cli::from_args(&["helmsman"], &["status"]).is_err());
    }
}
