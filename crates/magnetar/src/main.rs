use clap::{Parser, Subcommand};
use magnetar_cluster::{ApiClient, CacheSyncer, CacheSyncerConfig, ClusterCache};
use magnetar_core::RebalancerConfig;
use magnetar_plugin::PlacementPlugin;
use magnetar_rebalancer::{
    run_reservation_sweeper, CleanupWorker, MigrationExecutor, MigrationStateWorker,
    RebalancerController,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "magnetar", about = "Magnetar cluster workload rebalancer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rebalancer against an API server
    Run {
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:6443")]
        api_url: String,
        /// Path to a JSON or YAML configuration file
        #[arg(long)]
        config: Option<String>,
        /// Use the development QPS profile (100 QPS / 200 burst)
        #[arg(long, default_value_t = false)]
        dev: bool,
    },
    /// Validate a configuration file and print the applied settings
    Validate {
        /// Path to a JSON or YAML configuration file
        #[arg(long)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            api_url,
            config,
            dev,
        } => run(&api_url, config.as_deref(), dev).await,
        Commands::Validate { config } => validate(&config),
    }
}

/// Wait for either SIGINT (ctrl-c) or SIGTERM, returning which one fired.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Load and validate the rebalancer configuration
fn load_config(path: Option<&str>) -> miette::Result<RebalancerConfig> {
    let Some(path) = path else {
        return Ok(RebalancerConfig::default());
    };

    let data = std::fs::read(path)
        .map_err(|e| miette::miette!("Failed to read config file '{}': {}", path, e))?;

    RebalancerConfig::from_slice(&data).map_err(|e| {
        miette::miette!(
            help = "The file must be JSON or YAML with the recognized rebalancer options",
            "Invalid configuration in '{}': {}",
            path,
            e
        )
    })
}

/// Validate a configuration file and print the applied settings
fn validate(path: &str) -> miette::Result<()> {
    let config = load_config(Some(path))?;
    println!("{:#?}", config);
    Ok(())
}

/// Run all rebalancer components until a shutdown signal arrives
async fn run(api_url: &str, config_path: Option<&str>, dev: bool) -> miette::Result<()> {
    info!("Starting magnetar rebalancer");

    let config = load_config(config_path)?;

    let api = Arc::new(if dev {
        ApiClient::dev(api_url)
    } else {
        ApiClient::new(api_url)
    });
    let cache = Arc::new(ClusterCache::new());
    let (event_tx, _) = broadcast::channel(256);

    let token = CancellationToken::new();

    // 1. Cache syncer feeds the cache and the event bus
    let syncer = CacheSyncer::new(
        Arc::clone(&api),
        Arc::clone(&cache),
        event_tx.clone(),
        CacheSyncerConfig {
            sync_interval: config.rebalancing_interval(),
        },
    );
    let syncer_token = token.clone();
    let syncer_handle = tokio::spawn(async move {
        if let Err(e) = syncer.run(syncer_token).await {
            error!("Cache syncer error: {}", e);
        }
    });

    // 2. Placement plugin (registered with the host framework elsewhere;
    // here it owns the reservation ledger and the recent-target map)
    let plugin = Arc::new(PlacementPlugin::new(Arc::clone(&cache), config.clone()));
    let sweeper_handle = tokio::spawn(run_reservation_sweeper(
        Arc::clone(&plugin),
        config.clone(),
        token.clone(),
    ));

    // 3. Migration executor shared by the controller and the state worker
    let executor = Arc::new(MigrationExecutor::new(
        Arc::clone(&cache),
        Arc::clone(&api),
        plugin.recent_targets(),
    ));

    // 4. Rebalancer controller
    let controller = RebalancerController::new(
        Arc::clone(&cache),
        Arc::clone(&executor),
        config.clone(),
    );
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("Rebalancer controller error: {}", e);
        }
    });

    // 5. Migration state worker routes label transitions and retries
    let state_worker = MigrationStateWorker::new(
        Arc::clone(&cache),
        Arc::clone(&api),
        Arc::clone(&executor),
        event_tx.clone(),
        config.clone(),
    );
    let state_token = token.clone();
    let state_handle = tokio::spawn(async move {
        if let Err(e) = state_worker.run(state_token).await {
            error!("Migration state worker error: {}", e);
        }
    });

    // 6. Cleanup worker reconciles steering, budgets, and stale labels
    let cleanup = CleanupWorker::new(Arc::clone(&cache), Arc::clone(&api));
    let cleanup_token = token.clone();
    let cleanup_handle = tokio::spawn(async move {
        if let Err(e) = cleanup.run(cleanup_token).await {
            error!("Cleanup worker error: {}", e);
        }
    });

    info!(
        api_url,
        interval_seconds = config.rebalancing_interval_seconds,
        "All components started"
    );

    // Wait for shutdown signal (SIGINT or SIGTERM)
    let sig = shutdown_signal().await;
    info!("Received {}, shutting down gracefully...", sig);
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = std::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(
            syncer_handle,
            sweeper_handle,
            controller_handle,
            state_handle,
            cleanup_handle,
        );
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.cpu_threshold, 80.0);
        assert_eq!(config.max_rebalance_pods, 10);
    }

    #[test]
    fn test_load_config_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cpuThreshold: 70\nmaxRebalancePods: 3").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.cpu_threshold, 70.0);
        assert_eq!(config.max_rebalance_pods, 3);
    }

    #[test]
    fn test_load_config_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"memoryThreshold": 75.0}}"#).unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.memory_threshold, 75.0);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cpuThreshold: 0").unwrap();

        assert!(load_config(file.path().to_str()).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Some("/nonexistent/magnetar.yaml")).is_err());
    }
}
