//! Connection options and pluggable stream transports.

use super::auth::Pbkdf2Cache;
use super::handshake::{Handshake, HandshakeV0_4, HandshakeV1_0};
use super::protocol::ProtocolVersion;
use crate::error::{ReqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Default client driver port
pub const DEFAULT_PORT: u16 = 28015;

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Server host name or address
    pub host: String,

    /// Client driver port
    pub port: u16,

    /// Default database for queries that don't name one
    pub db: Option<String>,

    /// User name (V1_0 handshake)
    pub user: String,

    /// Password (V1_0 handshake)
    pub password: String,

    /// Authorization key (V0_4 handshake)
    pub auth_key: Option<String>,

    /// Handshake protocol version
    pub handshake: ProtocolVersion,

    /// Bound on socket connect plus handshake, in seconds
    pub connect_timeout_secs: u64,

    /// Bound on the NOREPLY_WAIT drain performed by `close`, in seconds
    pub close_timeout_secs: Option<u64>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            db: None,
            user: "admin".to_string(),
            password: String::new(),
            auth_key: None,
            handshake: ProtocolVersion::V1_0,
            connect_timeout_secs: 20,
            close_timeout_secs: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ReqlError::driver(format!("Invalid configuration: {}", e)))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ReqlError::driver(format!("Could not read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_timeout(&self) -> Option<Duration> {
        self.close_timeout_secs.map(Duration::from_secs)
    }

    /// A fresh handshake state machine for one connection attempt.
    pub fn handshake(&self, cache: Arc<Pbkdf2Cache>) -> Box<dyn Handshake> {
        match self.handshake {
            ProtocolVersion::V0_4 => {
                Box::new(HandshakeV0_4::new(self.auth_key.clone().unwrap_or_default()))
            }
            ProtocolVersion::V1_0 => {
                Box::new(HandshakeV1_0::new(self.user.clone(), self.password.clone(), cache))
            }
        }
    }
}

/// Byte stream a connection runs over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens the underlying stream for a connection. Swapping the connector is
/// how other transports (TLS, in-memory pipes in tests) plug in.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectionOptions) -> Result<BoxedStream>;
}

/// Plain TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, options: &ConnectionOptions) -> Result<BoxedStream> {
        let address = options.address();
        let stream = TcpStream::connect(&address).await.map_err(|e| {
            ReqlError::driver(format!("Could not connect to {}. Error: {}", address, e))
        })?;
        stream.set_nodelay(true)?;
        tracing::debug!(%address, "TCP connection established");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.address(), "localhost:28015");
        assert_eq!(options.user, "admin");
        assert_eq!(options.handshake, ProtocolVersion::V1_0);
        assert_eq!(options.connect_timeout(), Duration::from_secs(20));
        assert!(options.close_timeout().is_none());
    }

    #[test]
    fn test_from_toml() {
        let options = ConnectionOptions::from_toml_str(
            r#"
            host = "db.internal"
            port = 29015
            db = "blog"
            handshake = "v0_4"
            auth_key = "hunter2"
            close_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(options.address(), "db.internal:29015");
        assert_eq!(options.db.as_deref(), Some("blog"));
        assert_eq!(options.handshake, ProtocolVersion::V0_4);
        assert_eq!(options.close_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(options.user, "admin");
    }

    #[test]
    fn test_invalid_toml() {
        let err = ConnectionOptions::from_toml_str("port = \"nope\"").unwrap_err();
        assert!(err.to_string().starts_with("Invalid configuration"));
    }

    #[test]
    fn test_missing_file() {
        assert!(ConnectionOptions::from_toml_file("/nonexistent/reql.toml").is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = ConnectionOptions::new("127.0.0.1", port);
        let err = TcpConnector.connect(&options).await.err().unwrap();
        assert!(err.to_string().starts_with("Could not connect to 127.0.0.1"));
    }
}
