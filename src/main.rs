use anyhow::Context;
use bacnet_events::{Config, Device, LoggingTransport};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bacnet_events=info")),
        )
        .init();

    info!("bacnet-events v{} starting", bacnet_events::VERSION);

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: bacnet-events <config.yaml>");
        std::process::exit(1);
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    config.validate().context("invalid configuration")?;
    info!(
        "Loaded {} notification classes, {} objects, {} event enrollments",
        config.notification_classes.len(),
        config.objects.len(),
        config.event_enrollments.len()
    );

    let device = Arc::new(Device::from_config(&config, Arc::new(LoggingTransport))?);

    let runner = Arc::clone(&device);
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            device.stop();
            handle.await??;
        }
        res = &mut handle => {
            if let Err(e) = res? {
                error!("Device error: {}", e);
                std::process::exit(1);
            }
        }
    }

    info!("Device stopped normally");

    let stats = device.stats();
    info!(
        "Final stats: {} ticks, {} transitions, {} event notifications, {} COV notifications",
        stats.ticks, stats.transitions, stats.notifications_sent, stats.cov_notifications
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
