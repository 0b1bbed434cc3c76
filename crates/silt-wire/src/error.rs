use thiserror::Error;

use rmp::Marker;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no encoding rule for value: {0}")]
    UnknownType(String),

    #[error("malformed payload for tag '{tag}': {detail}")]
    BadPayload { tag: char, detail: String },

    #[error("unknown type tag: {0}")]
    UnknownTypeTag(String),

    #[error("message size {size} exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid headers containing null values: {0}")]
    BadHeaders(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn bad_payload(tag: char, detail: impl Into<String>) -> Self {
        CodecError::BadPayload {
            tag,
            detail: detail.into(),
        }
    }
}

impl From<rmp::encode::ValueWriteError> for CodecError {
    fn from(e: rmp::encode::ValueWriteError) -> Self {
        match e {
            rmp::encode::ValueWriteError::InvalidMarkerWrite(e)
            | rmp::encode::ValueWriteError::InvalidDataWrite(e) => CodecError::Io(e),
        }
    }
}

impl From<rmp::decode::MarkerReadError> for CodecError {
    fn from(e: rmp::decode::MarkerReadError) -> Self {
        CodecError::Io(e.0)
    }
}

impl From<rmp::decode::ValueReadError> for CodecError {
    fn from(e: rmp::decode::ValueReadError) -> Self {
        match e {
            rmp::decode::ValueReadError::InvalidMarkerRead(e)
            | rmp::decode::ValueReadError::InvalidDataRead(e) => CodecError::Io(e),
            rmp::decode::ValueReadError::TypeMismatch(m) => {
                CodecError::Malformed(format!("unexpected marker {m:?}"))
            }
        }
    }
}

impl From<Marker> for CodecError {
    fn from(m: Marker) -> Self {
        CodecError::Malformed(format!("unsupported marker {m:?}"))
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
