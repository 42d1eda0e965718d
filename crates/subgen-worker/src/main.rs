//! Subtitle pipeline worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subgen_models::{TargetTrack, TrackMode};
use subgen_worker::{JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("subgen=info".parse().unwrap())
        .add_directive("aws_sdk_s3=warn".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting subgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let executor = match JobExecutor::new(config).await {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!("Failed to create job executor: {}", e);
            std::process::exit(1);
        }
    };

    // Submit a job passed on the command line: SOURCE [lang[,lang...]],
    // with a `:sdh` suffix for the accessibility variant.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(source) = args.first() {
        let targets = parse_targets(args.get(1).map(String::as_str).unwrap_or("eng"));
        match executor.submit(source, targets).await {
            Ok(id) => info!("Submitted job {}", id),
            Err(e) => {
                error!("Failed to submit job: {}", e);
                std::process::exit(2);
            }
        }
    }

    // Shutdown on ctrl-c; in-flight jobs pause and resume on restart.
    let shutdown_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Parse a comma-separated target list, e.g. `eng,ben:sdh`.
fn parse_targets(spec: &str) -> Vec<TargetTrack> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let entry = entry.trim();
            match entry.strip_suffix(":sdh") {
                Some(lang) => TargetTrack::new(lang, TrackMode::Sdh),
                None => TargetTrack::new(entry, TrackMode::Standard),
            }
        })
        .collect()
}
