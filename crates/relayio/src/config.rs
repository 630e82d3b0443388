use std::time::Duration;

use beamio::config::EngineConfig;

/// Configuration for the Socket.IO server and its underlying engine.
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    /// The engine config. Its `req_path` defaults to `/socket.io` here.
    pub(crate) engine_config: EngineConfig,

    /// How long an emit waits for its acknowledgement before yielding a
    /// timeout error.
    ///
    /// Defaults to 5 seconds.
    pub(crate) ack_timeout: Duration,

    /// How long a connection may stay open without joining any namespace
    /// before being dropped.
    ///
    /// Defaults to 45 seconds.
    pub(crate) connect_timeout: Duration,
}

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            engine_config: EngineConfig::builder().req_path("/socket.io").build(),
            ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(45),
        }
    }
}
