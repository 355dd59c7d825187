//! Value codec: application values to stored bytes and back.
//!
//! The facade never interprets stored content. It only needs the encoded size
//! (for limits and billing) and the first byte, which tells a framed value from
//! one written before framing headers existed:
//!
//! - `0xFF` - a versioned header follows (`0xFF`, version byte, payload).
//! - anything else - a legacy value with no header, written at
//!   [`OLDEST_FORMAT_VERSION`].
//!
//! Legacy values are still present in long-lived actors, so the fallback is permanent.

use bytes::Bytes;
use thiserror::Error;
use tracing::error;

use crate::error::StorageError;

/// First byte of every value written with a framing header.
pub const HEADER_TAG: u8 = 0xFF;

/// Format version written by [`JsonCodec`].
pub const CURRENT_FORMAT_VERSION: u8 = 15;

/// Format version assumed for values without a framing header.
pub const OLDEST_FORMAT_VERSION: u8 = 13;

/// Number of leading bytes included in decode failure logs.
const LOGGED_PREFIX_LEN: usize = 3;

/// How a stored buffer is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The buffer starts with [`HEADER_TAG`] and carries its own version.
    Versioned,
    /// The buffer has no header and is read at the given version.
    Legacy {
        /// Version the payload was written at.
        version: u8,
    },
}

impl Framing {
    /// Detects the framing of a stored buffer from its first byte.
    #[must_use]
    pub fn detect(buf: &[u8]) -> Self {
        match buf.first() {
            Some(&HEADER_TAG) => Self::Versioned,
            _ => Self::Legacy { version: OLDEST_FORMAT_VERSION },
        }
    }
}

/// Errors raised by a [`ValueCodec`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The stored buffer was empty.
    #[error("unexpectedly empty value buffer")]
    Empty,
    /// The header was cut off before its version byte.
    #[error("truncated framing header")]
    TruncatedHeader,
    /// The header named a version this codec cannot read.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    /// The payload itself was malformed.
    #[error(transparent)]
    Payload(#[from] serde_json::Error),
}

/// Encodes application values into stored bytes and decodes them back.
pub trait ValueCodec: Send + Sync {
    /// Encodes a value, including any framing header.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the value cannot be represented.
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError>;

    /// Decodes a stored buffer with the given framing.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the buffer is malformed.
    fn deserialize(&self, buf: &[u8], framing: Framing) -> Result<serde_json::Value, CodecError>;
}

/// JSON payload codec with a two-byte versioned header.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![HEADER_TAG, CURRENT_FORMAT_VERSION];
        serde_json::to_writer(&mut buf, value)?;
        Ok(buf)
    }

    fn deserialize(&self, buf: &[u8], framing: Framing) -> Result<serde_json::Value, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Empty);
        }
        let payload = match framing {
            Framing::Versioned => {
                let version = *buf.get(1).ok_or(CodecError::TruncatedHeader)?;
                if !(OLDEST_FORMAT_VERSION..=CURRENT_FORMAT_VERSION).contains(&version) {
                    return Err(CodecError::UnsupportedVersion(version));
                }
                &buf[2..]
            },
            Framing::Legacy { version } => {
                if version != OLDEST_FORMAT_VERSION {
                    return Err(CodecError::UnsupportedVersion(version));
                }
                buf
            },
        };
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Decodes a value read from storage, choosing framing from its first byte.
///
/// A failure is logged with the key, the buffer length and its first three
/// bytes (never the full value) and surfaced as an internal error.
pub(crate) fn decode_stored(
    codec: &dyn ValueCodec,
    key: &[u8],
    buf: &Bytes,
) -> Result<serde_json::Value, StorageError> {
    codec.deserialize(buf, Framing::detect(buf)).map_err(|err| {
        let prefix = &buf[..buf.len().min(LOGGED_PREFIX_LEN)];
        error!(
            key = %String::from_utf8_lossy(key),
            len = buf.len(),
            prefix = ?prefix,
            error = %err,
            "actor storage deserialization failed"
        );
        StorageError::internal_with_source("failed to deserialize stored value", err)
    })
}
