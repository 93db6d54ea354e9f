//! geosearch service entry point
//!
//! Serves JSON-RPC 2.0 over stdio. Logs go to stderr and, with
//! `--log-dir`, to daily files.

use clap::Parser;
use geosearch_server::config::CliArgs;
use geosearch_server::logging::daily_file_writer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // Initialize logging
    let log_filter = if args.verbose {
        "geosearch_server=debug,geosearch_store=debug"
    } else {
        "geosearch_server=info,geosearch_store=info"
    };

    let (file_writer, guard) = match args.log_dir.as_deref().map(daily_file_writer) {
        Some(Ok((writer, guard))) => (Some(writer), Some(guard)),
        Some(Err(e)) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        }))
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            drop(guard);
            std::process::exit(2);
        }
    };

    tracing::info!("Starting geosearch {}", env!("CARGO_PKG_VERSION"));

    // Exit explicitly: a pending stdin read would otherwise hold the runtime
    let code = match geosearch_server::app::run(config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };
    // process::exit skips destructors; flush the file log first
    drop(guard);
    std::process::exit(code);
}
