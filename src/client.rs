//! HTTP client module for authenticating against the hub.
//!
//! This module provides the login flow: an async HTTP client with connection
//! pooling that posts the device credentials as an urlencoded form and
//! retries failed attempts after a fixed delay until the hub issues a
//! session token.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Credentials posted to the login endpoint as an urlencoded form.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Owner identifier the device belongs to
    #[serde(rename = "ownerId")]
    pub owner_id: String,

    /// Identity the device presents to the hub
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// Response from a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Session token for the streaming connection
    pub token: String,
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status {
        code: StatusCode,
        message: String,
    },

    /// Failed to parse response body
    Parse(String),

    /// All login attempts exhausted
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "All {} login attempts exhausted. Last error: {}",
                    attempts, last_error
                )
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// HTTP client for the hub login endpoint.
///
/// The client uses connection pooling (via reqwest's internal pool) and
/// implements the fixed-delay retry loop around login attempts: any failure
/// (transport error, non-success status, unparseable body) schedules the
/// next attempt after the configured delay.
///
/// # Example
///
/// ```no_run
/// use device_simulator::client::HubClient;
/// use device_simulator::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let client = HubClient::new(&config, "deviceId-7").expect("Failed to create client");
///
///     let token = client.login().await.expect("Login gave up");
///     println!("Session token issued: {} bytes", token.len());
/// }
/// ```
pub struct HubClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// URL for the login endpoint
    login_url: String,

    /// Credentials sent with every login attempt
    credentials: LoginRequest,

    /// Fixed delay between login attempts
    retry_delay: Duration,

    /// Optional cap on attempts; retries forever when unset
    max_attempts: Option<u32>,

    /// Request timeout duration
    timeout: Duration,
}

impl HubClient {
    /// Create a new hub client for the given device identity.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration containing endpoint, owner, and retry settings
    /// * `device_id` - The identity this device presents to the hub
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config, device_id: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            login_url: config.login_url.clone(),
            credentials: LoginRequest {
                owner_id: config.owner_id.clone(),
                device_id: device_id.into(),
            },
            retry_delay: config.login_retry_delay,
            max_attempts: config.login_max_attempts,
            timeout: config.request_timeout,
        })
    }

    /// Log in to the hub and obtain a session token.
    ///
    /// Every failure is retried after the configured fixed delay. With the
    /// default unbounded policy this resolves only once the hub issues a
    /// token; with a configured attempt cap it gives up with
    /// `ClientError::RetriesExhausted`.
    pub async fn login(&self) -> Result<String, ClientError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.send_login().await {
                Ok(response) => {
                    info!(
                        device_id = %self.credentials.device_id,
                        attempt = attempt,
                        "Logged in to hub"
                    );
                    return Ok(response.token);
                }
                Err(e) => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            error!(
                                error = %e,
                                attempts = attempt,
                                "Login failed, attempt limit reached"
                            );
                            return Err(ClientError::RetriesExhausted {
                                attempts: attempt,
                                last_error: e.to_string(),
                            });
                        }
                    }

                    warn!(
                        error = %e,
                        attempt = attempt,
                        delay_ms = self.retry_delay.as_millis(),
                        "Login failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Send a single login request without retry logic.
    async fn send_login(&self) -> Result<LoginResponse, ClientError> {
        debug!(
            url = %self.login_url,
            device_id = %self.credentials.device_id,
            "Sending login request"
        );

        let response = self
            .client
            .post(&self.login_url)
            .timeout(self.timeout)
            .form(&self.credentials)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            // Parse successful response
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
        } else {
            // Handle error response
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Get the configured login URL.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Get the device identity presented at login.
    pub fn device_id(&self) -> &str {
        &self.credentials.device_id
    }

    /// Get the configured attempt cap, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Get the delay between login attempts.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: &str) -> Config {
        let mut config = Config::default();
        config.login_url = format!("{}/login", server_uri);
        config.login_retry_delay = Duration::from_millis(10);
        config
    }

    #[test]
    fn test_client_creation() {
        let config = Config::default();
        let client = HubClient::new(&config, "deviceId-7");
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.login_url(), "http://localhost:3000/login");
        assert_eq!(client.device_id(), "deviceId-7");
        assert!(client.max_attempts().is_none());
        assert_eq!(client.retry_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_login_request_field_names() {
        let request = LoginRequest {
            owner_id: "owner-1".to_string(),
            device_id: "deviceId-7".to_string(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ownerId": "owner-1", "deviceId": "deviceId-7"})
        );
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::UNAUTHORIZED,
            message: "bad credentials".to_string(),
        };
        assert!(format!("{}", err).contains("401"));
        assert!(format!("{}", err).contains("bad credentials"));

        let err = ClientError::RetriesExhausted {
            attempts: 3,
            last_error: "Connection refused".to_string(),
        };
        assert!(format!("{}", err).contains("3"));
        assert!(format!("{}", err).contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_login_success_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("ownerId=owner-1"))
            .and(body_string_contains("deviceId=deviceId-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "session-token-1"
            })))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = HubClient::new(&config, "deviceId-7").unwrap();

        let token = client.login().await.unwrap();
        assert_eq!(token, "session-token-1");
    }

    #[tokio::test]
    async fn test_login_retries_until_success() {
        let server = MockServer::start().await;

        // First two attempts are rejected, the third succeeds
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "finally"
            })))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = HubClient::new(&config, "deviceId-8").unwrap();

        let token = client.login().await.unwrap();
        assert_eq!(token, "finally");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_login_retries_unparseable_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "recovered"
            })))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = HubClient::new(&config, "deviceId-7").unwrap();

        assert_eq!(client.login().await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn test_login_gives_up_after_attempt_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.login_max_attempts = Some(3);
        let client = HubClient::new(&config, "deviceId-7").unwrap();

        let err = client.login().await.unwrap_err();
        match err {
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("401"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_login_timeout_counts_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(200))
                    .set_body_json(serde_json::json!({"token": "slow"})),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.request_timeout = Duration::from_millis(50);
        config.login_max_attempts = Some(1);
        let client = HubClient::new(&config, "deviceId-7").unwrap();

        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn test_login_response_deserialization() {
        let json = r#"{"token": "abc-123", "extra": "ignored"}"#;

        let response: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.token, "abc-123");
    }
}
