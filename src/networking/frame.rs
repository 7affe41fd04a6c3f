use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{PeerError, Result};

/// Highest message version this node speaks.
pub const VERSION: u32 = 1;

/// Maximum total frame size, enforced on both send and receive.
pub const MAX_MESSAGE_SIZE: usize = 192 * 1024 * 1024;

/// Payloads below this size are never compressed.
pub const MIN_COMPRESS_SIZE: usize = 256;

/// Flag bit marking a gzip-compressed payload.
pub const FLAG_COMPRESSED: u32 = 0x1;

/// Size of the fixed message prefix.
pub const PREFIX_SIZE: usize = 20;

/// A decoded peer message.
#[derive(Debug, PartialEq)]
pub struct Frame {
    pub version: u32,
    pub request_id: u64,
    pub payload: String,
}

impl Frame {
    /// Encode a payload into a wire frame.
    ///
    /// Payloads of [`MIN_COMPRESS_SIZE`] bytes or more are gzipped when
    /// `compress` is set; the prefix always records the uncompressed length.
    pub fn encode(
        payload: &[u8],
        request_id: u64,
        version: u32,
        compress: bool,
    ) -> Result<Vec<u8>> {
        let mut flags = 0u32;
        let body = if compress && payload.len() >= MIN_COMPRESS_SIZE {
            flags |= FLAG_COMPRESSED;
            let mut encoder =
                GzEncoder::new(Vec::with_capacity(payload.len()), Compression::default());
            encoder.write_all(payload)?;
            encoder.finish()?
        } else {
            payload.to_vec()
        };
        if PREFIX_SIZE + body.len() > MAX_MESSAGE_SIZE {
            return Err(PeerError::FrameTooLarge(PREFIX_SIZE + body.len()));
        }
        let mut frame = Vec::with_capacity(PREFIX_SIZE + body.len());
        frame.extend(&version.to_be_bytes());
        frame.extend(&request_id.to_be_bytes());
        frame.extend(&flags.to_be_bytes());
        frame.extend(&(payload.len() as u32).to_be_bytes());
        frame.extend(&body);
        Ok(frame)
    }

    /// Decode a wire frame.
    ///
    /// The output buffer for a compressed payload is sized from the declared
    /// uncompressed length; a compressed stream that ends early fails with
    /// [`PeerError::TruncatedCompressedBody`].
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < PREFIX_SIZE {
            return Err(PeerError::MalformedPrefix);
        }
        let version = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let request_id = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
        let flags = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
        let uncompressed_len = u32::from_be_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let body = &bytes[PREFIX_SIZE..];
        let payload_bytes = if flags & FLAG_COMPRESSED != 0 {
            if uncompressed_len > MAX_MESSAGE_SIZE {
                return Err(PeerError::MalformedPrefix);
            }
            let mut decoder = GzDecoder::new(body);
            let mut buffer = vec![0u8; uncompressed_len];
            decoder.read_exact(&mut buffer).map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => PeerError::TruncatedCompressedBody,
                _ => PeerError::Io(err),
            })?;
            buffer
        } else {
            body.to_vec()
        };
        let payload = String::from_utf8(payload_bytes)?;
        Ok(Frame {
            version,
            request_id,
            payload,
        })
    }
}
