use std::env;
use std::path::PathBuf;

use tokio::sync::watch;

use siem_pipeline::alerting::{AlertDispatcher, AlertQueue};
use siem_pipeline::config::Config;
use siem_pipeline::output::{OutputFormat, OutputHandler};
use siem_pipeline::pipeline;
use siem_pipeline::queue::QueueTransport;

/// Queue consumer entry point: detection and indexing for every record
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting SIEM processor...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let mut config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };
    config.apply_env_overrides();

    // Every backend must be reachable before consuming starts
    let deps = match pipeline::connect(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            log::error!("[FATAL] {}", e);
            return Err(e.into());
        }
    };

    // Alert output
    let output_format = OutputFormat::from_str(&config.output.format);
    let output_handler = OutputHandler::new(output_format, config.output.file_path.clone())?;
    let dispatcher = AlertDispatcher::new(output_handler);
    let (alert_tx, alert_rx) = AlertDispatcher::create_channel();
    let dispatcher_handle = tokio::spawn(dispatcher.run(alert_rx));

    let processor = pipeline::build_processor(&config, &deps, AlertQueue::new(alert_tx));

    // Setup graceful shutdown signal handling
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        shutdown_tx.send_replace(true);
    })?;

    log::info!(
        "Processor running with {} worker(s) on '{}'. Press Ctrl+C to stop.",
        config.processor.workers,
        config.queue.queue_name
    );

    // Workers drop their alert handles on exit, which lets the dispatcher drain and stop
    let stats = processor.run(shutdown_rx).await;
    match dispatcher_handle.await {
        Ok(count) => log::info!("Dispatched {} alert(s)", count),
        Err(e) => log::error!("Alert dispatcher failed: {}", e),
    }

    if let Err(e) = deps.queue.close().await {
        log::warn!("Failed to release queue consumer: {}", e);
    }

    log::info!("SIEM processor stopped after {} record(s)", stats.processed);
    Ok(())
}
