use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use routing::Manager;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

#[derive(Parser)]
enum CliCommand {
    /// Runs the routing daemon.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run(args) => {
            let config = match Config::from_file(&args.config_file_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            };
            let _sentry = init_logging(config.logging.as_ref());
            if let Err(e) = start(config) {
                tracing::error!("Autorouting failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn start(config: Config) -> Result<(), StartupError> {
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = config
        .and_then(|c| c.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("autorouting"))
        .map_err(|e| StartupError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| StartupError::Metrics("a recorder is already installed".into()))?;
    shared::metrics_defs::describe_all(routing::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run(config: Config) -> Result<(), StartupError> {
    let registry = Arc::new(config.build_registry()?);
    tracing::info!(repositories = registry.all().len(), "Repositories loaded");

    let manager = Manager::new(config.routing, registry);
    manager.startup().await;

    let probe = manager.clone();
    let admin = AdminService::<std::io::Error>::new(Arc::new(move || probe.is_ready()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Could not listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let result = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
        shutdown,
    )
    .await;
    manager.shutdown();
    Ok(result?)
}
