use thiserror::Error;

/// Errors surfaced by the peer transport layer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// An operation required a live session and none is open.
    #[error("websocket session is not open")]
    SessionNotOpen,

    /// An encoded frame would exceed the maximum message size.
    #[error("message length {0} exceeds the maximum message size")]
    FrameTooLarge(usize),

    /// An inbound frame is shorter than the fixed prefix or carries an
    /// impossible length field.
    #[error("message prefix is malformed")]
    MalformedPrefix,

    /// The decoded payload is not valid UTF-8.
    #[error("message payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The compressed body ended before the declared uncompressed length
    /// was produced.
    #[error("end of data while reading compressed payload")]
    TruncatedCompressedBody,

    /// The websocket upgrade did not complete within the connect timeout.
    #[error("websocket connection timed out")]
    ConnectTimeout,

    /// No response arrived within the read timeout.
    #[error("websocket read timeout exceeded")]
    ReadTimeout,

    /// The session closed while a request was outstanding.
    #[error("websocket connection closed")]
    SessionClosed,

    /// I/O failure surfaced from the underlying transport.
    #[error("websocket i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
