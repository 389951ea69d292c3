//! mongos3 - MongoDB to S3 exporter
//!
//! Streams a MongoDB collection into a single S3 object, one Extended JSON
//! document per line, using concurrent multipart uploads.
//!
//! # Usage
//!
//! ```bash
//! mongos3 --uri mongodb://localhost:27017 --database shop --collection orders \
//!     --bucket exports --key orders.jsonl --progress
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use mongos3::cli::CliInterface;
use mongos3::error::{ExportError, Result};
use mongos3::export::{ExportCoordinator, ExportReport, MongoSource, ProgressTracker};
use mongos3::storage::S3Backend;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or run the export
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    cli.config().validate()?;
    run_export(&cli).await
}

/// Connect both ends and drive one export to completion
async fn run_export(cli: &CliInterface) -> Result<()> {
    let selector = cli.selector()?;
    let (bucket, key) = cli.destination()?;
    let config = cli.config();

    cli.print_banner(&selector, &bucket, &key);

    let source = MongoSource::connect(&config.source.uri)
        .await?
        .with_no_cursor_timeout(config.source.no_cursor_timeout);
    let backend = S3Backend::new(&config.storage).await;

    let cancel_token = CancellationToken::new();
    let ctrl_c_handle = spawn_ctrl_c_handler(cancel_token.clone());

    let tracker = ProgressTracker::new(cli.args().progress && !cli.args().quiet);
    let mut coordinator = ExportCoordinator::new(
        Arc::new(source),
        Arc::new(backend),
        selector,
        bucket,
        key,
        config.export_options(),
    )
    .with_progress(tracker)
    .with_cancellation(cancel_token);

    let outcome = coordinator.execute().await;
    ctrl_c_handle.abort();

    let report = outcome?;
    if !cli.args().quiet {
        print_report(&report);
    }
    Ok(())
}

/// Cancel the export on Ctrl+C
fn spawn_ctrl_c_handler(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, cancelling export");
                token.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    })
}

fn print_report(report: &ExportReport) {
    println!("Exported {} documents to {}", report.documents_exported, report.location);
    if report.documents_skipped > 0 {
        println!("Skipped {} malformed documents", report.documents_skipped);
    }
    println!(
        "{} parts, {} bytes in {:.2}s",
        report.parts_uploaded,
        report.bytes_uploaded,
        report.elapsed_ms as f64 / 1000.0
    );
}

/// Process exit status for a failed run
fn exit_code(err: &ExportError) -> i32 {
    match err {
        ExportError::Cancelled => 130,
        ExportError::Config(_) | ExportError::InvalidTarget(_) => 2,
        _ => 1,
    }
}

/// Initialize logging system based on verbosity level
///
/// `RUST_LOG` takes precedence over the configured level.
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }

    debug!("Logging initialized at {}", level);
}
