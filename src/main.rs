//! graph-balancer CLI.
//!
//! # Commands
//! - `query <script>`: run one script through the balancer, print results
//! - `status`: connect, run one health pass, print per-backend health
//! - `watch`: keep the balancer running, log health every interval and
//!   apply endpoint changes from the config file until a signal arrives

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use graph_balancer::config::watcher::ConfigWatcher;
use graph_balancer::config::{load_config, BalancerConfig};
use graph_balancer::gremlin::{GremlinConnector, GremlinSession};
use graph_balancer::lifecycle::signals::wait_for_signal;
use graph_balancer::observability::{logging, metrics};
use graph_balancer::LoadBalancer;

#[derive(Parser)]
#[command(name = "graph-balancer")]
#[command(about = "Round-robin load balancer for Gremlin graph backends", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "graph-balancer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Gremlin script against the next healthy backend
    Query {
        /// Script to evaluate; `g` is bound to the configured traversal source
        script: String,
    },
    /// Print backend health
    Status,
    /// Run until interrupted, logging health and hot-reloading endpoints
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability.log_level, config.observability.log_format)?;
    tracing::info!(
        config = ?cli.config,
        endpoints = config.endpoints.len(),
        traversal_source = %config.traversal_source,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let balancer = LoadBalancer::from_config(GremlinConnector::new(), &config).await;

    let outcome = match cli.command {
        Commands::Query { script } => query(&balancer, script).await,
        Commands::Status => {
            balancer.check_health().await;
            print_status(&balancer);
            Ok(())
        }
        Commands::Watch => watch(&balancer, &cli.config, &config).await,
    };

    balancer.close().await;
    outcome
}

async fn query(balancer: &LoadBalancer<GremlinConnector>, script: String) -> Result<(), Box<dyn std::error::Error>> {
    let results = balancer
        .dispatch_list(|session: Arc<GremlinSession>| async move { session.submit_all(&script).await })
        .await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn print_status(balancer: &LoadBalancer<GremlinConnector>) {
    for (endpoint, healthy) in balancer.endpoints().iter().zip(balancer.health()) {
        println!("{:<48} {}", endpoint, if healthy { "healthy" } else { "down" });
    }
}

async fn watch(
    balancer: &LoadBalancer<GremlinConnector>,
    path: &std::path::Path,
    config: &BalancerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (watcher, mut updates) = ConfigWatcher::new(path, config);
    let _watcher = watcher.run()?;

    let mut ticker = tokio::time::interval(config.health_check.settings().interval);
    let signal = wait_for_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = ticker.tick() => {
                tracing::info!(
                    healthy = balancer.rotation_size(),
                    total = balancer.endpoints().len(),
                    "Rotation status"
                );
            }
            Some(new_config) = updates.recv() => {
                if new_config.traversal_source != config.traversal_source {
                    tracing::warn!("traversal_source changes require a restart, ignoring");
                }
                match balancer.sync_endpoints(new_config.endpoints.as_slice()).await {
                    Ok(report) => tracing::info!(added = ?report.added, removed = ?report.removed, "Endpoints reloaded"),
                    Err(e) => tracing::error!(error = %e, "Failed to apply endpoint changes"),
                }
            }
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}
