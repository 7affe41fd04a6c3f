/*!
# Basalt

Basalt is a peer-to-peer blockchain node. This crate carries the peer
networking layer: a binary RPC transport that multiplexes JSON POST
request/response exchanges between nodes over a single upgraded HTTP
connection (a websocket).

See the [`networking`] module for the wire protocol.
*/
pub mod error;
pub mod networking;
pub mod settings;
pub mod time;

/// Application-level error type used by the node binary.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Application-level result type used by the node binary.
pub type Result<T> = std::result::Result<T, Error>;
