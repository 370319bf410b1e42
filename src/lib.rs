//! Device Simulator Library
//!
//! This library provides components for a simulated IoT device that streams
//! sensor readings to a hub:
//!
//! - **config**: Environment-based configuration for the simulator
//! - **client**: HTTP login client with fixed-delay retry
//! - **stream**: WebSocket connection handling and event emission
//! - **data_generator**: Periodic sensor batch generation with per-sensor policies
//! - **device**: Connection lifecycle tying login, stream, and data together
//!
//! # Example
//!
//! ```no_run
//! use device_simulator::config::Config;
//! use device_simulator::data_generator::DataGenerator;
//! use device_simulator::device::Device;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Inspect one sensor batch without connecting anywhere
//!     let generator = DataGenerator::new(config.sensors.clone(), config.sample_interval);
//!     println!("sample batch: {:?}", generator.sample());
//!
//!     // Run the device: log in, connect, stream until interrupted
//!     let mut device = Device::new(&config).expect("Failed to create device");
//!     device.run().await.expect("Device stopped");
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod data_generator;
pub mod device;
pub mod stream;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, HubClient, LoginRequest, LoginResponse};
pub use config::{Config, ConfigError};
pub use data_generator::{DataGenerator, SensorBatch, SensorSpec, DEFAULT_SENSOR_VALUE};
pub use device::{ConnectionState, Device};
pub use stream::{HubStream, StreamError, StreamSender};
