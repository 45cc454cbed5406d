//! Value codecs: how typed arguments and return values become frame payloads.

use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tandem_core::HandlerError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Converts values to and from argument payloads.
///
/// Both peers must agree on the codec; the wire format only carries opaque
/// byte strings.
pub trait Codec: Clone + Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError>;

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;

    /// Decode a value the remote sent no payload for (a result frame with
    /// zero arguments).
    fn decode_absent<T: DeserializeOwned>(&self) -> Result<T, CodecError>;
}

/// JSON via `serde_json`. An absent value decodes as `null`, so `()` and
/// `Option<T>` round-trip through empty results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(CodecError::encode)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::decode)
    }

    fn decode_absent<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_value(serde_json::Value::Null).map_err(CodecError::decode)
    }
}

/// A value could not be encoded or decoded.
#[derive(Debug)]
pub enum CodecError {
    Encode(BoxError),
    Decode(BoxError),
}

impl CodecError {
    pub fn encode(error: impl Into<BoxError>) -> Self {
        Self::Encode(error.into())
    }

    pub fn decode(error: impl Into<BoxError>) -> Self {
        Self::Decode(error.into())
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl StdError for CodecError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Encode(e) | Self::Decode(e) => Some(e.as_ref()),
        }
    }
}

impl From<CodecError> for HandlerError {
    fn from(e: CodecError) -> Self {
        HandlerError::new(e.to_string())
    }
}
