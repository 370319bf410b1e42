//! Configuration module for the device simulator.
//!
//! This module provides environment-based configuration for the simulated
//! device, including hub endpoints, device identity, retry delays, and the
//! sensor definitions used by the data generator.

use std::env;
use std::time::Duration;

use url::Url;

use crate::data_generator::SensorSpec;

/// Default hub base URL
const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Default login endpoint path
const DEFAULT_LOGIN_PATH: &str = "/login";

/// Default streaming endpoint path
const DEFAULT_DEVICES_PATH: &str = "/devices";

/// Default owner identifier sent with login requests
const DEFAULT_OWNER_ID: &str = "owner-1";

/// Default lower bound (inclusive) for the random device identity suffix
const DEFAULT_DEVICE_ID_MIN: u32 = 7;

/// Default upper bound (exclusive) for the random device identity suffix
const DEFAULT_DEVICE_ID_MAX: u32 = 8;

/// Default delay between login attempts in milliseconds
const DEFAULT_LOGIN_RETRY_MS: u64 = 5_000;

/// Default delay before reconnecting after a disconnect in milliseconds
const DEFAULT_RECONNECT_MS: u64 = 5_000;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum HTTP request timeout in seconds
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default sampling interval in milliseconds
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1_000;

/// Minimum sampling interval to prevent busy-looping on the timer
const MIN_SAMPLE_INTERVAL_MS: u64 = 10;

/// Maximum retry and reconnect delay to keep the lifecycle responsive
const MAX_DELAY_MS: u64 = 300_000;

/// Configuration for the device simulator.
///
/// All settings can be configured via environment variables:
/// - `DEVICE_SIMULATOR_SERVER_URL`: Hub base URL (default: http://localhost:3000)
/// - `DEVICE_SIMULATOR_OWNER_ID`: Owner identifier (default: owner-1)
/// - `DEVICE_SIMULATOR_DEVICE_ID`: Fixed device identity (default: randomly generated)
/// - `DEVICE_SIMULATOR_LOGIN_RETRY_MS`: Delay between login attempts (default: 5000)
/// - `DEVICE_SIMULATOR_RECONNECT_MS`: Delay before reconnecting (default: 5000)
/// - `DEVICE_SIMULATOR_SAMPLE_INTERVAL_MS`: Delay between sensor batches (default: 1000)
/// - `DEVICE_SIMULATOR_SENSORS`: Sensor definitions as a JSON array
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for the hub
    pub server_url: String,

    /// Full URL for the login endpoint
    pub login_url: String,

    /// Full URL for the streaming endpoint (ws/wss scheme)
    pub stream_url: String,

    /// Owner identifier sent with login requests
    pub owner_id: String,

    /// Fixed device identity; a random one is generated when unset
    pub device_id: Option<String>,

    /// Lower bound (inclusive) for the random device identity suffix
    pub device_id_min: u32,

    /// Upper bound (exclusive) for the random device identity suffix
    pub device_id_max: u32,

    /// Fixed delay between login attempts
    pub login_retry_delay: Duration,

    /// Optional cap on login attempts; retries forever when unset
    pub login_max_attempts: Option<u32>,

    /// Fixed delay before re-authenticating after a disconnect
    pub reconnect_delay: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Whether the data generator runs while connected
    pub data_enabled: bool,

    /// Interval between sensor batches
    pub sample_interval: Duration,

    /// Sensor definitions for the data generator
    pub sensors: Vec<SensorSpec>,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns a new `Config` instance with values from environment variables,
    /// falling back to sensible defaults where appropriate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `DEVICE_SIMULATOR_SERVER_URL` is not a valid http(s) URL
    /// - an endpoint path override does not start with `/`
    /// - a delay, interval, or timeout variable is not a valid number or exceeds limits
    /// - the identity suffix range is empty
    /// - `DEVICE_SIMULATOR_SENSORS` is not a JSON array of sensor definitions
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use device_simulator::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Hub URL: {}", config.server_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load and normalize the hub base URL
        let server_url = env::var("DEVICE_SIMULATOR_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let server_url = server_url.trim_end_matches('/').to_string();

        let (login_url, stream_url) = Self::derive_endpoints(&server_url)?;

        let owner_id = env::var("DEVICE_SIMULATOR_OWNER_ID")
            .unwrap_or_else(|_| DEFAULT_OWNER_ID.to_string());

        let device_id = env::var("DEVICE_SIMULATOR_DEVICE_ID").ok();

        let (device_id_min, device_id_max) = Self::parse_device_id_range()?;

        let login_retry_delay =
            Self::parse_delay_ms("DEVICE_SIMULATOR_LOGIN_RETRY_MS", DEFAULT_LOGIN_RETRY_MS)?;
        let reconnect_delay =
            Self::parse_delay_ms("DEVICE_SIMULATOR_RECONNECT_MS", DEFAULT_RECONNECT_MS)?;

        let login_max_attempts = Self::parse_login_max_attempts()?;

        let request_timeout = Self::parse_request_timeout()?;

        let data_enabled = Self::parse_data_enabled()?;
        let sample_interval = Self::parse_sample_interval()?;
        let sensors = Self::parse_sensors()?;

        Ok(Self {
            server_url,
            login_url,
            stream_url,
            owner_id,
            device_id,
            device_id_min,
            device_id_max,
            login_retry_delay,
            login_max_attempts,
            reconnect_delay,
            request_timeout,
            data_enabled,
            sample_interval,
            sensors,
        })
    }

    /// Derive the login and streaming endpoint URLs from the base URL.
    ///
    /// The streaming endpoint keeps host, port, and path but switches the
    /// scheme to its WebSocket counterpart (`http` to `ws`, `https` to `wss`).
    fn derive_endpoints(server_url: &str) -> Result<(String, String), ConfigError> {
        let env_var = "DEVICE_SIMULATOR_SERVER_URL";

        let parsed = Url::parse(server_url).map_err(|e| ConfigError {
            message: format!("'{}' is not a valid URL: {}", server_url, e),
            env_var: Some(env_var.to_string()),
        })?;

        let ws_scheme = match parsed.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ConfigError {
                    message: format!("unsupported scheme '{}', expected http or https", other),
                    env_var: Some(env_var.to_string()),
                })
            }
        };

        let login_path =
            Self::parse_endpoint_path("DEVICE_SIMULATOR_LOGIN_PATH", DEFAULT_LOGIN_PATH)?;
        let devices_path =
            Self::parse_endpoint_path("DEVICE_SIMULATOR_DEVICES_PATH", DEFAULT_DEVICES_PATH)?;

        let mut stream_base = parsed;
        stream_base.set_scheme(ws_scheme).map_err(|_| ConfigError {
            message: format!("cannot map '{}' to a WebSocket URL", server_url),
            env_var: Some(env_var.to_string()),
        })?;
        let stream_base = stream_base.to_string();

        let login_url = format!("{}{}", server_url, login_path);
        let stream_url = format!("{}{}", stream_base.trim_end_matches('/'), devices_path);

        Ok((login_url, stream_url))
    }

    /// Parse an endpoint path override; paths are joined onto the base URL
    /// verbatim and must be absolute.
    fn parse_endpoint_path(env_var: &str, default: &str) -> Result<String, ConfigError> {
        match env::var(env_var) {
            Ok(value) => {
                if !value.starts_with('/') {
                    return Err(ConfigError {
                        message: format!("path '{}' must start with '/'", value),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(value)
            }
            Err(_) => Ok(default.to_string()),
        }
    }

    /// Parse the random identity suffix range with validation.
    fn parse_device_id_range() -> Result<(u32, u32), ConfigError> {
        let min = Self::parse_u32("DEVICE_SIMULATOR_DEVICE_ID_MIN", DEFAULT_DEVICE_ID_MIN)?;
        let max = Self::parse_u32("DEVICE_SIMULATOR_DEVICE_ID_MAX", DEFAULT_DEVICE_ID_MAX)?;

        if min >= max {
            return Err(ConfigError {
                message: format!("identity suffix range [{}, {}) is empty", min, max),
                env_var: Some("DEVICE_SIMULATOR_DEVICE_ID_MAX".to_string()),
            });
        }

        Ok((min, max))
    }

    fn parse_u32(env_var: &str, default: u32) -> Result<u32, ConfigError> {
        match env::var(env_var) {
            Ok(value) => value.parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(env_var.to_string()),
            }),
            Err(_) => Ok(default),
        }
    }

    /// Parse a millisecond delay from an environment variable with validation.
    fn parse_delay_ms(env_var: &str, default_ms: u64) -> Result<Duration, ConfigError> {
        match env::var(env_var) {
            Ok(value) => {
                let ms: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if ms == 0 {
                    return Err(ConfigError {
                        message: "delay must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if ms > MAX_DELAY_MS {
                    return Err(ConfigError {
                        message: format!("delay {} exceeds maximum ({}ms)", ms, MAX_DELAY_MS),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(Duration::from_millis(ms))
            }
            Err(_) => Ok(Duration::from_millis(default_ms)),
        }
    }

    /// Parse the login attempt cap; unset means unbounded retries.
    fn parse_login_max_attempts() -> Result<Option<u32>, ConfigError> {
        let env_var = "DEVICE_SIMULATOR_LOGIN_MAX_ATTEMPTS";

        match env::var(env_var) {
            Ok(value) => {
                let attempts: u32 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if attempts == 0 {
                    return Err(ConfigError {
                        message: "attempt limit must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(Some(attempts))
            }
            Err(_) => Ok(None),
        }
    }

    /// Parse the HTTP request timeout with validation.
    fn parse_request_timeout() -> Result<Duration, ConfigError> {
        let env_var = "DEVICE_SIMULATOR_REQUEST_TIMEOUT_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if secs == 0 {
                    return Err(ConfigError {
                        message: "timeout must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if secs > MAX_REQUEST_TIMEOUT_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "timeout {} exceeds maximum ({}s)",
                            secs, MAX_REQUEST_TIMEOUT_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(Duration::from_secs(secs))
            }
            Err(_) => Ok(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        }
    }

    fn parse_data_enabled() -> Result<bool, ConfigError> {
        let env_var = "DEVICE_SIMULATOR_DATA_ENABLED";

        match env::var(env_var) {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError {
                    message: format!("'{}' is not a valid boolean", value),
                    env_var: Some(env_var.to_string()),
                }),
            },
            Err(_) => Ok(true),
        }
    }

    /// Parse the sampling interval from an environment variable with validation.
    fn parse_sample_interval() -> Result<Duration, ConfigError> {
        let env_var = "DEVICE_SIMULATOR_SAMPLE_INTERVAL_MS";

        match env::var(env_var) {
            Ok(value) => {
                let ms: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if ms < MIN_SAMPLE_INTERVAL_MS {
                    return Err(ConfigError {
                        message: format!(
                            "sample interval {} is below minimum ({}ms)",
                            ms, MIN_SAMPLE_INTERVAL_MS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(Duration::from_millis(ms))
            }
            Err(_) => Ok(Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS)),
        }
    }

    /// Parse sensor definitions from the `DEVICE_SIMULATOR_SENSORS` JSON array.
    fn parse_sensors() -> Result<Vec<SensorSpec>, ConfigError> {
        let env_var = "DEVICE_SIMULATOR_SENSORS";

        match env::var(env_var) {
            Ok(value) => {
                let sensors: Vec<SensorSpec> =
                    serde_json::from_str(&value).map_err(|e| ConfigError {
                        message: format!("invalid sensor JSON: {}", e),
                        env_var: Some(env_var.to_string()),
                    })?;

                if sensors.is_empty() {
                    return Err(ConfigError {
                        message: "sensor list must not be empty".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(sensors)
            }
            Err(_) => Ok(default_sensors()),
        }
    }
}

/// Built-in sensor set covering all three reading patterns.
fn default_sensors() -> Vec<SensorSpec> {
    vec![
        SensorSpec::sequence(vec![1.0, 2.0, 3.0]),
        SensorSpec::random(vec![10.0, 20.0, 30.0]),
        SensorSpec::range(21.5, 26.5),
    ]
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            login_url: format!("{}{}", DEFAULT_SERVER_URL, DEFAULT_LOGIN_PATH),
            stream_url: format!("ws://localhost:3000{}", DEFAULT_DEVICES_PATH),
            owner_id: DEFAULT_OWNER_ID.to_string(),
            device_id: None,
            device_id_min: DEFAULT_DEVICE_ID_MIN,
            device_id_max: DEFAULT_DEVICE_ID_MAX,
            login_retry_delay: Duration::from_millis(DEFAULT_LOGIN_RETRY_MS),
            login_max_attempts: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            data_enabled: true,
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            sensors: default_sensors(),
        }
    }
}
