//! dispatchlb - HTTP request dispatcher with health-aware load balancing
//!
//! Usage:
//!     dispatchlb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use dispatchlb::backend::Dispatcher;
use dispatchlb::config::{Config, ConfigWatcher, load_config};
use dispatchlb::frontend::FrontendListener;
use dispatchlb::metrics::{MetricsCollector, MetricsServer};
use dispatchlb::proxy::{HttpClient, HttpClientConfig};
use dispatchlb::util::{ShutdownSignal, init_logging, wait_for_signal};

/// HTTP request dispatcher with health-aware load balancing.
#[derive(Parser, Debug)]
#[command(name = "dispatchlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    if cli.validate {
        println!("Configuration is valid.");
        println!("  Listen: {}", config.listen);
        println!("  Algorithm: {:?}", config.algorithm);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!(
                "    - {} (weight {})",
                backend.address,
                backend.weight.unwrap_or(1.0)
            );
        }
        return Ok(());
    }

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    info!(
        config_path = %cli.config.display(),
        listen = %config.listen,
        algorithm = ?config.algorithm,
        backends = config.backends.len(),
        "dispatchlb starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(cli.config, config))
}

/// Wire up every component and run until a shutdown signal arrives.
async fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let client = HttpClient::new(HttpClientConfig {
        connect_timeout: config.proxy.connect_timeout,
        probe_path: config.health_check.path.clone(),
        expected_status: config.health_check.expected_status,
    });

    let dispatcher = Arc::new(Dispatcher::new(
        &config.algorithm,
        client.clone(),
        metrics.clone(),
    ));

    for backend in &config.backends {
        dispatcher
            .add_backend(&backend.address, backend.weight)
            .with_context(|| format!("failed to register backend '{}'", backend.address))?;
    }

    let mut handles = Vec::new();

    if config.health_check.enabled {
        handles.push(dispatcher.start_health_checking(
            client,
            config.health_check.interval,
            config.health_check.timeout,
            shutdown.subscribe(),
        ));
    } else {
        info!("health checking disabled, all backends stay healthy");
    }

    if config.global.metrics.enabled {
        let server = MetricsServer::new(
            config.global.metrics.address,
            config.global.metrics.path.clone(),
            metrics.clone(),
        );
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let watcher = ConfigWatcher::new(config_path, reload_callback(&config, &dispatcher));
    handles.push(tokio::spawn(watcher.run(shutdown.subscribe())));

    let listener = FrontendListener::bind(config.listen, Arc::clone(&dispatcher), metrics)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("dispatchlb is running");
    info!("press Ctrl+C to stop");

    wait_for_signal().await;
    shutdown.shutdown();

    for handle in handles {
        let _ = handle.await;
    }

    info!("dispatchlb shut down complete");
    Ok(())
}

/// Apply a reloaded configuration to the running dispatcher.
///
/// Only new backends take effect; everything else needs a restart.
fn reload_callback(
    initial: &Config,
    dispatcher: &Arc<Dispatcher<HttpClient>>,
) -> Box<dyn Fn(Config) + Send + Sync> {
    let listen = initial.listen;
    let algorithm = initial.algorithm.clone();
    let dispatcher = Arc::clone(dispatcher);

    Box::new(move |config: Config| {
        if config.listen != listen {
            warn!(current = %listen, configured = %config.listen, "listen address change requires a restart");
        }
        if config.algorithm != algorithm {
            warn!(current = ?algorithm, configured = ?config.algorithm, "algorithm change requires a restart");
        }

        let added = dispatcher.sync_backends(&config.backends);
        info!(
            added,
            registered = dispatcher.registry().len(),
            "backends synchronized"
        );
    })
}
