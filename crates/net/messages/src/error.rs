use std::io;

/// Errors from encoding or decoding network messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("unsupported protocol version {received}, expected {expected}")]
    UnsupportedVersion { received: u32, expected: u32 },
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
