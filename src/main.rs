use clap::{Parser, Subcommand};
use kafka_platform::{Config, Platform, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-platform")]
#[command(about = "Kafka topic bootstrap, JSON producer and consumer", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, global = true, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the configured topics if they are missing
    Bootstrap,
    /// Publish messages as JSON
    Produce {
        /// Target topic, defaults to kafka.default_topic
        #[arg(short, long)]
        topic: Option<String>,

        #[arg(value_name = "MESSAGE", default_values_t = vec!["Hello, world".to_string()])]
        messages: Vec<String>,
    },
    /// Consume and log messages until interrupted
    Consume,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let loaded = Config::load(args.config.as_deref());
    let (level, json) = match &loaded {
        Ok(cfg) => (cfg.logger.level.clone(), args.json_logs || cfg.logger.json),
        Err(_) => ("info".to_string(), args.json_logs),
    };
    init_logging(&level, json, args.verbose);

    let config = match loaded {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        kafka_brokers = %config.kafka.brokers,
        kafka_topics = ?config.kafka.topics,
        kafka_group_id = %config.kafka.group_id,
        log_level = %config.logger.level,
        "Configuration summary"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    let platform = Platform::with_shutdown(config, shutdown);

    match run(&platform, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancellation() => {
            warn!("Interrupted before completion");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(platform: &Platform, command: Command) -> Result<()> {
    match command {
        Command::Bootstrap => platform.bootstrap().await,
        Command::Produce { topic, messages } => platform.produce(topic.as_deref(), &messages).await,
        Command::Consume => platform.consume().await.map(|_| ()),
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    shutdown_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_logging(level: &str, json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_platform=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
