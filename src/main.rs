//! Autosync - Multi-Cluster Replication Gateway
//!
//! Sits in front of a storage proxy and replicates account and container
//! writes to the peer cluster, wiring up container sync along the way.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autosync::api::GatewayServer;
use autosync::config::AutosyncConfig;
use autosync::error::Result;
use autosync::interceptor::Interceptor;
use autosync::replication::ReplicationConfig;

/// Autosync - Multi-Cluster Replication Gateway
#[derive(Parser)]
#[command(name = "autosync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "autosync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the replication gateway
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "autosync.toml")]
        output: PathBuf,

        /// URL of the local cluster
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        my_cluster: String,

        /// Comma-separated cluster URLs holding replicated resources
        #[arg(long)]
        placement: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show the effective replication setup
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init {
            output,
            my_cluster,
            placement,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "full");
            run_init(output, my_cluster, placement)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "full");
            run_validate(cli.config)
        }
        Commands::Info => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "full");
            run_info(cli.config)
        }
    }
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format.eq_ignore_ascii_case("compact") {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(config_path: &Path) -> Result<AutosyncConfig> {
    let mut config = AutosyncConfig::from_file(config_path)?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Start the gateway
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(log_level.as_deref().unwrap_or("info"), "full");
            tracing::error!("Failed to load {}: {}", config_path.display(), e);
            return Err(e);
        }
    };

    init_logging(
        log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    );
    tracing::info!("Starting autosync gateway...");

    match (config.my_cluster(), config.placement()) {
        (Some(my_cluster), Some(placement)) => {
            tracing::info!("Local cluster: {}", my_cluster);
            tracing::info!("Default placement: {}", placement);
        }
        _ => tracing::warn!(
            "No default placement configured, only requests carrying placement context are replicated"
        ),
    }

    let replication = ReplicationConfig::from(&config);
    tracing::info!(
        "Peer timeouts: connect {:?}, request {:?}, join grace {:?}",
        replication.connect_timeout,
        replication.request_timeout,
        replication.join_grace
    );

    let interceptor = Interceptor::from_config(&config)?;
    let server = GatewayServer::new(config.gateway.clone(), interceptor);
    server.start().await
}

fn run_init(output: PathBuf, my_cluster: String, placement: Option<String>) -> Result<()> {
    let has_placement = placement.is_some();
    std::fs::write(&output, sample_config(&my_cluster, placement.as_deref()))?;
    println!("Configuration file created: {}", output.display());
    if !has_placement {
        println!("\nReplication stays off until cluster.placement is set.");
    }
    println!("Then start with: autosync --config {} start", output.display());

    Ok(())
}

/// Sample configuration written by `init`
///
/// Without a placement the line stays commented out, so the gateway
/// passes everything through instead of failing every request.
fn sample_config(my_cluster: &str, placement: Option<&str>) -> String {
    let placement_line = match placement {
        Some(placement) => format!("placement = \"{}\"", placement),
        None => format!("# placement = \"{},https://peer.example.com\"", my_cluster),
    };

    format!(
        r#"# Autosync Configuration
# Generated configuration file

[cluster]
# URL of this cluster's storage proxy, as the other clusters reach it
my_cluster = "{my_cluster}"
# Clusters holding every replicated account and container, this one included.
# Exactly two clusters are supported.
{placement_line}

[peer]
connect_timeout_ms = 10000
request_timeout_ms = 2000
join_grace_ms = 500

[gateway]
bind_address = "0.0.0.0:8090"
upstream = "http://127.0.0.1:8080"
upstream_timeout_ms = 30000
# Body limit for replicated account and container requests
max_body_bytes = 16777216
trust_context_headers = false

[logging]
level = "info"
format = "full"
"#
    )
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Bind Address: {}", config.gateway.bind_address);
            println!("  Upstream:     {}", config.gateway.upstream);
            match (config.my_cluster(), config.placement()) {
                (Some(my_cluster), Some(placement)) => {
                    if let Err(e) = placement.peers_of(&my_cluster).and_then(|p| p.require_single()) {
                        println!("  Warning: {}", e);
                    }
                    println!("  Replication:  {} -> [{}]", my_cluster, placement);
                }
                _ => println!("  Replication:  context headers only"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show the effective replication setup
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let replication = ReplicationConfig::from(&config);

    println!("Autosync Gateway Information");
    println!("============================");
    println!();
    println!("Gateway:");
    println!("  Bind Address:   {}", config.gateway.bind_address);
    println!("  Upstream:       {}", config.gateway.upstream);
    println!("  Max Body:       {} bytes", config.gateway.max_body_bytes);
    println!("  Context Hdrs:   {}", if config.gateway.trust_context_headers { "trusted" } else { "ignored" });
    println!();
    println!("Replication:");
    match config.my_cluster() {
        Some(my_cluster) => println!("  Local Cluster:  {}", my_cluster),
        None => println!("  Local Cluster:  (not set)"),
    }
    match config.placement() {
        Some(placement) => println!("  Placement:      {}", placement),
        None => println!("  Placement:      (not set)"),
    }
    if let (Some(my_cluster), Some(placement)) = (config.my_cluster(), config.placement()) {
        match placement.peers_of(&my_cluster) {
            Ok(peers) => {
                for (peer, sync_to) in peers.chain(&my_cluster) {
                    println!("  Peer:           {} (syncs to {})", peer, sync_to);
                }
                if let Some(last) = peers.last() {
                    println!("  Local Syncs To: {}", last);
                }
                if peers.len() != 1 {
                    println!("  Warning:        {} peers, writes will be rejected", peers.len());
                }
            }
            Err(e) => println!("  Error:          {}", e),
        }
    }
    println!();
    println!("Timeouts:");
    println!("  Connect:        {:?}", replication.connect_timeout);
    println!("  Request:        {:?}", replication.request_timeout);
    println!("  Join Grace:     {:?}", replication.join_grace);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_without_placement_is_inert() {
        let config = AutosyncConfig::from_str(&sample_config("http://local:8080", None)).unwrap();

        assert!(config.my_cluster().is_some());
        assert!(config.placement().is_none());
        assert!(!config.replication_enabled());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config = AutosyncConfig::from_str(&sample_config(
            "http://local:8080",
            Some("http://local:8080,http://remote:8080"),
        ))
        .unwrap();
        let defaults = AutosyncConfig::default();

        assert!(config.replication_enabled());
        assert_eq!(config.gateway.max_body_bytes, defaults.gateway.max_body_bytes);
        assert_eq!(config.gateway.upstream_timeout_ms, defaults.gateway.upstream_timeout_ms);
        assert_eq!(config.peer.connect_timeout_ms, defaults.peer.connect_timeout_ms);
        assert_eq!(config.peer.request_timeout_ms, defaults.peer.request_timeout_ms);
    }
}
