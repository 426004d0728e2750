// cerberus-api: Wire layer for the cerberusd IPC protocol (JSON Lines over local sockets)

pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, FrameHandler, NoopHandler,
    OfflinePolicy, ReconnectConfig, SessionEnd,
};
pub use error::Error;
pub use protocol::{Envelope, MessageKind, PROTOCOL_VERSION};
pub use transport::Endpoint;
