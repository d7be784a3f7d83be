//! Entry point for the Rank Room rating service

use anyhow::Result;
use clap::Parser;
use rank_room::config::{validate_config, AppConfig};
use rank_room::service::AppState;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Rank Room - profile rating rounds with a coin ledger
#[derive(Parser)]
#[command(
    name = "rank-room",
    version,
    about = "Round-based profile rating and reward engine",
    long_about = "Rank Room serves profiles to raters, records their scores, pays coins for \
                 high ratings and local leaderboards, and runs timed global rounds with \
                 entry fees and paid places."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    #[arg(long, help = "Log outbound events instead of publishing them to AMQP")]
    no_amqp: bool,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Rank Room rating service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   HTTP port: {}", config.service.http_port);
    if config.amqp.enabled {
        info!("   AMQP exchange: {}", config.amqp.exchange_name);
    } else {
        info!("   AMQP: disabled");
    }
    info!(
        "   Entry fee: {} coins, rating phase {}s, final voting {}s",
        config.rules.entry_fee, config.rules.rating_phase_seconds, config.rules.final_voting_seconds
    );
    info!(
        "   Sweeps: local every {}s, global every {}s",
        config.scheduler.local_sweep_interval_seconds,
        config.scheduler.global_sweep_interval_seconds
    );
}

/// File or environment config, then CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }
    if args.no_amqp {
        config.amqp.enabled = false;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.dry_run {
        if let Err(e) = validate_config(&config) {
            error!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let mut app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }
    info!("Rank Room is running, press Ctrl+C to stop");

    wait_for_shutdown_signal().await;

    if let Err(e) = app_state.shutdown().await {
        warn!("Shutdown finished with errors: {}", e);
    }
    info!("Rank Room stopped");
    Ok(())
}
