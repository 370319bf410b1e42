//! Device Simulator - Simulated IoT device for the hub platform
//!
//! This service impersonates a network-connected sensor device: it logs in
//! to the hub, opens a WebSocket stream, and emits sensor readings at a
//! fixed interval. Dropped connections trigger a fresh login and reconnect,
//! indefinitely.
//!
//! ## Features
//!
//! - Unattended connection lifecycle with login retry and automatic reconnect
//! - Token-authenticated WebSocket streaming
//! - Periodic sensor batches with per-sensor value policies
//! - Graceful shutdown on SIGINT
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `DEVICE_SIMULATOR_SERVER_URL`: Hub base URL (default: http://localhost:3000)
//! - `DEVICE_SIMULATOR_OWNER_ID`: Owner identity sent at login (default: owner-1)
//! - `DEVICE_SIMULATOR_DEVICE_ID`: Fixed device identity (default: randomly generated)
//! - `DEVICE_SIMULATOR_LOGIN_RETRY_MS`: Delay between login attempts (default: 5000)
//! - `DEVICE_SIMULATOR_RECONNECT_MS`: Delay before reconnecting (default: 5000)
//! - `DEVICE_SIMULATOR_SAMPLE_INTERVAL_MS`: Milliseconds between batches (default: 1000)
//! - `DEVICE_SIMULATOR_SENSORS`: JSON sensor definitions (default: built-in set)
//! - `RUST_LOG`: Logging level filter (default: info)

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use device_simulator::config::Config;
use device_simulator::device::Device;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();
    install_panic_hook();

    info!("Starting Device Simulator...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                server_url = %config.server_url,
                owner_id = %config.owner_id,
                sensors = config.sensors.len(),
                sample_interval_ms = config.sample_interval.as_millis(),
                data_enabled = config.data_enabled,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Build the device: identity, login client, stream, data generator
    let mut device = match Device::new(&config) {
        Ok(device) => {
            info!(device_id = %device.device_id(), "Device initialized");
            device
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize device");
            std::process::exit(1);
        }
    };

    // Spawn the lifecycle loop; it only returns on a configured login cap
    let mut device_handle = tokio::spawn(async move { device.run().await });

    info!("Device simulator running. Press Ctrl+C to stop.");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("Shutdown signal received, stopping...");
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
            }
            device_handle.abort();
        }
        result = &mut device_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Device stopped with an error");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Device task failed");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("Device simulator stopped");
}

/// Route panics through tracing before the default handler runs.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "Uncaught panic");
        default_hook(info);
    }));
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
