//! Client side of the RethinkDB wire protocol.
//!
//! ## Protocol Flow
//!
//! 1. **Handshake**: V0_4 (auth key) or V1_0 (SCRAM-SHA-256)
//! 2. **Query/Response Loop**: token-tagged frames, any number in flight
//! 3. **Cursors**: streamed results paced with CONTINUE / STOP
//!
//! ## Features
//!
//! - Pluggable transports through [`Connector`] (TCP by default, port 28015)
//! - Async API ([`Connection`], [`Cursor`]) and a blocking one
//!   ([`BlockingConnection`], [`BlockingCursor`]) over the same core
//! - PBKDF2 results cached across reconnects

pub mod auth;
pub mod blocking;
pub mod connection;
pub mod cursor;
pub mod handshake;
pub mod protocol;
pub mod transport;

pub use auth::Pbkdf2Cache;
pub use blocking::{BlockingConnection, BlockingCursor, BlockingOutput};
pub use connection::{Connection, ConnectionStatus, PendingResponse, QueryOutput, RunOptions};
pub use cursor::Cursor;
pub use handshake::{Handshake, HandshakeStep, HandshakeV0_4, HandshakeV1_0};
pub use protocol::{Frame, ProtocolVersion, Query, Response, PROTOCOL_JSON, VERSION_V0_4, VERSION_V1_0};
pub use transport::{AsyncStream, BoxedStream, ConnectionOptions, Connector, TcpConnector};
