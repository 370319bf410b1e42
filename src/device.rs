//! Device lifecycle management.
//!
//! A `Device` ties the pieces together and cycles forever: log in to the
//! hub, open the streaming connection with the issued token, emit sensor
//! batches while connected, and on any disconnect start over with a fresh
//! login after a fixed delay.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, HubClient};
use crate::config::Config;
use crate::data_generator::{DataGenerator, SensorBatch};
use crate::stream::HubStream;

/// Connection lifecycle states.
///
/// The device moves strictly forward through these and wraps around on
/// disconnect; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Payload of the `data` event emitted on every sampling tick.
#[derive(Debug, Serialize)]
struct DataPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,

    data: &'a SensorBatch,
}

/// Compute the device identity: the configured override verbatim, or a
/// random `deviceId-<n>` with `n` drawn from the configured range.
fn generate_device_id(config: &Config) -> String {
    match &config.device_id {
        Some(id) => id.clone(),
        None => {
            let n = rand::thread_rng().gen_range(config.device_id_min..config.device_id_max);
            format!("deviceId-{}", n)
        }
    }
}

/// A simulated device: identity, login client, streaming handle, and data
/// generator, driven by one connection lifecycle loop.
///
/// # Example
///
/// ```no_run
/// use device_simulator::config::Config;
/// use device_simulator::device::Device;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::from_env().expect("Failed to load config");
///     let mut device = Device::new(&config).expect("Failed to initialize device");
///     device.run().await.expect("Device stopped");
/// }
/// ```
pub struct Device {
    /// Identity presented to the hub; fixed for the process lifetime
    device_id: String,

    /// Login client
    client: HubClient,

    /// Streaming handle, reused across reconnects
    stream: HubStream,

    /// Data generator; absent when data generation is disabled
    generator: Option<DataGenerator>,

    /// Current lifecycle state
    state: ConnectionState,

    /// Fixed delay before re-entering authentication after a disconnect
    reconnect_delay: Duration,
}

impl Device {
    /// Build a device from configuration.
    ///
    /// The identity is computed here once; the streaming handle and the
    /// generator (with its sensor cursors) are created once and survive
    /// every reconnect.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let device_id = generate_device_id(config);
        let client = HubClient::new(config, device_id.clone())?;
        let stream = HubStream::new(config.stream_url.clone(), config.request_timeout);

        let generator = if config.data_enabled {
            Some(DataGenerator::new(
                config.sensors.clone(),
                config.sample_interval,
            ))
        } else {
            None
        };

        Ok(Self {
            device_id,
            client,
            stream,
            generator,
            state: ConnectionState::Disconnected,
            reconnect_delay: config.reconnect_delay,
        })
    }

    /// The identity this device presents to the hub.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the connection lifecycle until the process stops.
    ///
    /// Each cycle authenticates from scratch, connects the stream with the
    /// fresh token, and emits data until the connection drops. The only way
    /// this returns is a configured login attempt cap running out.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        loop {
            self.state = ConnectionState::Authenticating;
            info!(device_id = %self.device_id, "Authenticating with hub");
            let token = self.client.login().await?;

            self.state = ConnectionState::Connecting;
            let sender = match self.stream.connect(&token).await {
                Ok(sender) => sender,
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis(),
                        "Stream connect failed, will retry"
                    );
                    self.state = ConnectionState::Disconnected;
                    tokio::time::sleep(self.reconnect_delay).await;
                    continue;
                }
            };

            self.state = ConnectionState::Connected;
            info!(
                device_id = %self.device_id,
                endpoint = %self.stream.endpoint(),
                "Device connected to hub"
            );

            if let Some(generator) = self.generator.as_mut() {
                let device_id = self.device_id.clone();
                generator.start(move |batch| {
                    let payload = DataPayload {
                        device_id: &device_id,
                        data: &batch,
                    };
                    if let Err(e) = sender.emit("data", &payload) {
                        // Fire-and-forget: batches racing a dying
                        // connection are dropped
                        debug!(error = %e, "Dropped sensor batch");
                    }
                });
            }

            self.stream.disconnected().await;

            // Stop emitting before anything else happens on this cycle
            if let Some(generator) = self.generator.as_mut() {
                generator.stop();
            }
            error!(
                device_id = %self.device_id,
                delay_ms = self.reconnect_delay.as_millis(),
                "Device disconnected from hub"
            );
            self.state = ConnectionState::Disconnected;

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_generator::SensorSpec;
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_device_id_override() {
        let mut config = Config::default();
        config.device_id = Some("bench-device".to_string());
        assert_eq!(generate_device_id(&config), "bench-device");
    }

    #[test]
    fn test_device_id_from_single_member_range() {
        let mut config = Config::default();
        config.device_id = None;
        config.device_id_min = 7;
        config.device_id_max = 8;
        // [7, 8) has a single member
        assert_eq!(generate_device_id(&config), "deviceId-7");
    }

    #[test]
    fn test_device_id_within_bounds() {
        let mut config = Config::default();
        config.device_id_min = 1;
        config.device_id_max = 4;

        for _ in 0..20 {
            let id = generate_device_id(&config);
            let n: u32 = id.strip_prefix("deviceId-").unwrap().parse().unwrap();
            assert!((1..4).contains(&n), "suffix out of range: {}", id);
        }
    }

    #[test]
    fn test_new_device_starts_disconnected() {
        let config = Config::default();
        let device = Device::new(&config).unwrap();

        assert_eq!(device.state(), ConnectionState::Disconnected);
        assert!(device.device_id().starts_with("deviceId-"));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Disconnected), "disconnected");
        assert_eq!(
            format!("{}", ConnectionState::Authenticating),
            "authenticating"
        );
        assert_eq!(format!("{}", ConnectionState::Connecting), "connecting");
        assert_eq!(format!("{}", ConnectionState::Connected), "connected");
    }

    #[test]
    fn test_data_payload_shape() {
        let generator = DataGenerator::new(
            vec![SensorSpec::fixed(5.0)],
            Duration::from_millis(10),
        );
        let batch = generator.sample();
        let payload = DataPayload {
            device_id: "deviceId-7",
            data: &batch,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "deviceId": "deviceId-7",
                "data": {"sensorId-1": 5.0}
            })
        );
    }

    /// Minimal hub: accepts WebSocket sessions in sequence and forwards each
    /// received text frame as (session number, frame). The first session is
    /// dropped by the hub after `drop_first_after` frames.
    async fn spawn_hub(
        drop_first_after: usize,
    ) -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut session = 0;
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                session += 1;

                let mut socket = match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => socket,
                    Err(_) => continue,
                };

                let mut received = 0;
                while let Some(Ok(frame)) = socket.next().await {
                    if let Ok(text) = frame.into_text() {
                        received += 1;
                        tx.send((session, text)).ok();
                    }
                    if session == 1 && received >= drop_first_after {
                        // Kill the first session to force a reconnect
                        break;
                    }
                }
            }
        });

        (format!("ws://{}", addr), rx)
    }

    async fn login_server(token: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": token
            })))
            .mount(&server)
            .await;
        server
    }

    fn test_config(login_uri: &str, hub_url: &str) -> Config {
        let mut config = Config::default();
        config.login_url = format!("{}/login", login_uri);
        config.stream_url = format!("{}/devices", hub_url);
        config.device_id = Some("deviceId-7".to_string());
        config.login_retry_delay = Duration::from_millis(10);
        config.reconnect_delay = Duration::from_millis(10);
        config.sample_interval = Duration::from_millis(10);
        config.sensors = vec![SensorSpec::sequence(vec![1.0, 2.0, 3.0])];
        config
    }

    #[tokio::test]
    async fn test_lifecycle_emits_reconnects_and_relogs_in() {
        let login = login_server("session").await;
        let (hub_url, mut frames) = spawn_hub(2).await;

        let config = test_config(&login.uri(), &hub_url);
        let mut device = Device::new(&config).unwrap();
        let run = tokio::spawn(async move {
            device.run().await.ok();
        });

        // First session: frames flow with the full payload shape
        let (session, text) = timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("first frame in time")
            .expect("hub alive");
        assert_eq!(session, 1);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "data");
        assert_eq!(value["payload"]["deviceId"], "deviceId-7");
        assert_eq!(value["payload"]["data"]["sensorId-1"], 1.0);

        // The hub drops the first session after two frames; the device must
        // log in again and resume on a fresh session
        let mut reconnected = false;
        for _ in 0..10 {
            let (session, _text) = timeout(Duration::from_secs(5), frames.recv())
                .await
                .expect("frames keep flowing")
                .expect("hub alive");
            if session == 2 {
                reconnected = true;
                break;
            }
        }
        assert!(reconnected, "no frames arrived on a second session");

        let logins = login.received_requests().await.unwrap();
        assert!(logins.len() >= 2, "expected a re-login, saw {}", logins.len());

        // Credentials go out as an urlencoded form
        let body = String::from_utf8(logins[0].body.clone()).unwrap();
        assert!(body.contains("ownerId=owner-1"));
        assert!(body.contains("deviceId=deviceId-7"));

        run.abort();
    }

    #[tokio::test]
    async fn test_data_disabled_device_stays_silent() {
        let login = login_server("session").await;
        let (hub_url, mut frames) = spawn_hub(usize::MAX).await;

        let mut config = test_config(&login.uri(), &hub_url);
        config.data_enabled = false;
        let mut device = Device::new(&config).unwrap();
        let run = tokio::spawn(async move {
            device.run().await.ok();
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(frames.try_recv().is_err());

        run.abort();
    }

    #[tokio::test]
    async fn test_sequence_continues_across_sessions() {
        let login = login_server("session").await;
        let (hub_url, mut frames) = spawn_hub(1).await;

        let mut config = test_config(&login.uri(), &hub_url);
        // Wide spacing keeps ticks from landing inside the disconnect window
        config.sample_interval = Duration::from_millis(100);
        let mut device = Device::new(&config).unwrap();
        let run = tokio::spawn(async move {
            device.run().await.ok();
        });

        // One frame on session 1, then the hub cuts the connection
        let (_, first) = timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("first frame in time")
            .expect("hub alive");
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["payload"]["data"]["sensorId-1"], 1.0);

        // The next frame can only arrive on session 2, and the sequence
        // cursor has not been rewound by the reconnect
        let (session, second) = timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("second frame in time")
            .expect("hub alive");
        assert_eq!(session, 2);
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["payload"]["data"]["sensorId-1"], 2.0);

        run.abort();
    }
}
