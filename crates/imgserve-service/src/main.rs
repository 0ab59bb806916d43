//! imgserve
//!
//! Image classification inference service. A trained model is loaded once
//! and fed either from a directory (poll mode) or from Redis pub/sub
//! (event mode); both go through the same batching engine.

use anyhow::{Context, Result};
use clap::Parser;
use imgserve_inference::{BatchingEngine, InferenceSettings};
use imgserve_pipeline::{
    event, poll, CancellationToken, EventConfig, PollConfig, RedisConfig, RedisPublisher,
    RedisSubscriber, RunSummary,
};
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};

mod cli;
mod export_config;

use cli::{Cli, Commands, ModelArgs, PollArgs, RedisArgs, RuntimeArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Poll(args) => run_poll(args).await,
        Commands::Redis(args) => run_redis(args).await,
        Commands::ExportConfig(args) => {
            init_tracing(args.verbose, false);
            export_config::export(&args)
        }
    }
}

async fn run_poll(args: PollArgs) -> Result<()> {
    init_runtime(&args.runtime)?;
    info!("Starting imgserve in poll mode");

    let mut config = PollConfig::new(&args.prediction_in, &args.prediction_out)
        .with_delete_input(args.delete_input)
        .with_poll_wait(args.poll_wait)
        .with_continuous(args.continuous);
    if let Some(tmp) = &args.prediction_tmp {
        config = config.with_tmp_dir(tmp);
    }
    if args.use_watchdog {
        config = config.with_watchdog(args.watchdog_check_interval);
    }
    config.validate()?;

    let engine = load_engine(&args.model).await?;
    let cancel = cancel_on_shutdown();

    let summary = poll::build_runner(&config, engine)?
        .with_cancellation(cancel)
        .run()
        .await?;

    log_summary(&summary);
    Ok(())
}

async fn run_redis(args: RedisArgs) -> Result<()> {
    init_runtime(&args.runtime)?;
    info!("Starting imgserve in Redis mode");

    let redis = RedisConfig {
        host: args.redis_host.clone(),
        port: args.redis_port,
        db: args.redis_db,
    };
    let channels = EventConfig::new(&args.channel_in, &args.channel_out);

    let engine = load_engine(&args.model).await?;

    let subscriber = RedisSubscriber::connect(&redis, &channels.channel_in).await?;
    let publisher = RedisPublisher::connect(&redis).await?;
    info!(
        "Listening on '{}', publishing to '{}'",
        channels.channel_in, channels.channel_out
    );

    let cancel = cancel_on_shutdown();
    let summary = event::build_runner(&channels, subscriber, publisher, engine)
        .with_cancellation(cancel)
        .run()
        .await?;

    log_summary(&summary);
    Ok(())
}

/// Load the config, apply command-line values, and load the model
async fn load_engine(args: &ModelArgs) -> Result<BatchingEngine> {
    let mut settings = InferenceSettings::load(&args.config, &args.overrides)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    if let Some(model_path) = &args.model_path {
        settings.global.pretrained_model = Some(model_path.clone());
    }
    if let Some(labels) = &args.class_id_map_file {
        settings.infer.post_process.class_id_map_file = Some(labels.clone());
    }
    if let Some(device) = &args.device {
        settings.global.device = device.clone();
    }

    info!("Batch size: {}", settings.infer.batch_size);
    info!("Device: {}", settings.global.device);

    // Model download and weight loading block
    let engine = tokio::task::spawn_blocking(move || BatchingEngine::load(&settings))
        .await
        .context("Model loading task failed")??;

    info!("Model '{}' ready", engine.model_name());
    Ok(engine)
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Done: {} cycle(s), {} image(s) classified, {} failed",
        summary.cycles, summary.processed, summary.failed
    );
}

/// Token cancelled on SIGINT or SIGTERM
fn cancel_on_shutdown() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, finishing current image...");
        token.cancel();
    });
    cancel
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_runtime(args: &RuntimeArgs) -> Result<()> {
    init_tracing(args.verbose, args.quiet);
    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("imgserve=debug")
    } else if quiet {
        EnvFilter::new("imgserve=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imgserve=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve Prometheus metrics on `addr`
fn init_metrics(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    metrics::describe_counter!(
        "imgserve_items_total",
        "Images classified, by outcome (succeeded, failed)"
    );
    metrics::describe_counter!("imgserve_batches_total", "Model calls made");
    metrics::describe_histogram!(
        "imgserve_model_latency_us",
        metrics::Unit::Microseconds,
        "Model forward latency per batch in microseconds"
    );
    metrics::describe_counter!("imgserve_cycles_total", "Input discovery cycles run");

    info!("Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}
