use std::{sync::Arc, time::Duration};

use http::HeaderMap;

use crate::service::TransportType;

/// Decides whether a handshake request is allowed to open a session.
pub type Authenticator = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Configuration for the engine.
#[derive(Clone)]
pub struct EngineConfig {
    /// The path to listen for engine requests on.
    /// Defaults to `/engine.io`.
    pub req_path: String,

    /// The interval at which the server sends a ping packet to the client.
    /// Defaults to 25 seconds.
    pub ping_interval: Duration,

    /// The amount of time the server waits for a pong after a ping before
    /// closing the connection.
    /// Defaults to 20 seconds.
    pub ping_timeout: Duration,

    /// How long a polling GET request is held open waiting for data before
    /// being flushed with a noop packet.
    /// Defaults to `ping_interval + ping_timeout`.
    pub poll_timeout: Duration,

    /// How long the server waits for the upgrade packet on a probing
    /// websocket before discarding it and staying on the current transport.
    /// Defaults to 10 seconds.
    pub upgrade_timeout: Duration,

    /// The maximum number of packet batches buffered per connection before
    /// `emit()` returns an error.
    /// Defaults to 128.
    pub max_buffer_size: usize,

    /// The maximum number of bytes accepted per frame / http request body.
    /// Defaults to 1 MiB.
    pub max_payload: u64,

    /// Allowed transports, as a bitfield of [`TransportType`].
    /// Defaults to polling | websocket.
    pub transports: u8,

    /// Optional handshake authenticator; a `false` return is answered with
    /// the `Forbidden` protocol error.
    pub authenticator: Option<Authenticator>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("req_path", &self.req_path)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("poll_timeout", &self.poll_timeout)
            .field("upgrade_timeout", &self.upgrade_timeout)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("max_payload", &self.max_payload)
            .field("transports", &self.transports)
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            req_path: "/engine.io".to_string(),
            ping_interval: Duration::from_millis(25000),
            ping_timeout: Duration::from_millis(20000),
            poll_timeout: Duration::from_millis(45000),
            upgrade_timeout: Duration::from_millis(10000),
            max_buffer_size: 128,
            max_payload: 1024 * 1024,
            transports: TransportType::Polling as u8 | TransportType::Websocket as u8,
            authenticator: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Whether the given transport is enabled on this server.
    pub fn allowed_transport(&self, transport: TransportType) -> bool {
        self.transports & transport as u8 == transport as u8
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    config: EngineConfig,
    poll_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            poll_timeout: None,
        }
    }

    /// The path to listen for engine requests on.
    pub fn req_path(mut self, req_path: impl Into<String>) -> Self {
        self.config.req_path = req_path.into();
        self
    }

    /// The interval at which the server sends a ping packet to the client.
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.config.ping_interval = ping_interval;
        self
    }

    /// The amount of time the server waits for a pong before closing the
    /// connection.
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.config.ping_timeout = ping_timeout;
        self
    }

    /// How long a polling GET request is held open waiting for data.
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }

    /// How long the server waits for the upgrade packet on a probing
    /// websocket.
    pub fn upgrade_timeout(mut self, upgrade_timeout: Duration) -> Self {
        self.config.upgrade_timeout = upgrade_timeout;
        self
    }

    /// The maximum number of packet batches buffered per connection.
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.config.max_buffer_size = max_buffer_size;
        self
    }

    /// The maximum number of bytes accepted per frame / http request body.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    /// Reject handshakes for which the given function returns `false`.
    pub fn authenticator(
        mut self,
        authenticator: impl Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.config.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Allowed transports on this server.
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        self.config.transports = 0;
        for transport in transports {
            self.config.transports |= transport as u8;
        }
        self
    }

    pub fn build(mut self) -> EngineConfig {
        self.config.poll_timeout = self
            .poll_timeout
            .unwrap_or(self.config.ping_interval + self.config.ping_timeout);
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_timeout_defaults_to_heartbeat_window() {
        let config = EngineConfig::builder()
            .ping_interval(Duration::from_secs(10))
            .ping_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.poll_timeout, Duration::from_secs(15));

        let config = EngineConfig::builder()
            .poll_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
    }

    #[test]
    fn transports_bitfield() {
        let config = EngineConfig::builder()
            .transports([TransportType::Websocket])
            .build();
        assert!(config.allowed_transport(TransportType::Websocket));
        assert!(!config.allowed_transport(TransportType::Polling));
    }
}
