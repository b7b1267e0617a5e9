//! Versioned envelope and length-delimited framing.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{CodecError, CodecResult, NetworkMessage};

/// Version stamped on every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted by [`NetworkMessageCodec::default`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// A message together with the protocol version it was written with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub message: NetworkMessage,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    message: &'a NetworkMessage,
}

/// Encode `message` into an envelope of the current protocol version.
pub fn encode(message: &NetworkMessage) -> CodecResult<Vec<u8>> {
    postcard::to_allocvec(&EnvelopeRef {
        version: PROTOCOL_VERSION,
        message,
    })
    .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode an envelope, refusing any version other than [`PROTOCOL_VERSION`].
///
/// The version is read on its own first, so a newer peer's unknown variants
/// surface as a version error instead of an opaque decode failure.
pub fn decode(bytes: &[u8]) -> CodecResult<NetworkMessage> {
    let (version, rest) = postcard::take_from_bytes::<u32>(bytes)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion {
            received: version,
            expected: PROTOCOL_VERSION,
        });
    }
    postcard::from_bytes(rest).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Frames envelopes behind a big-endian u32 length prefix.
#[derive(Debug, Clone, Copy)]
pub struct NetworkMessageCodec {
    max_frame_size: usize,
}

impl NetworkMessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for NetworkMessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl asynchronous_codec::Encoder for NetworkMessageCodec {
    type Item<'a> = &'a NetworkMessage;
    type Error = CodecError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = encode(item)?;
        if body.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }
        let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
            size: body.len(),
            max: self.max_frame_size,
        })?;
        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl asynchronous_codec::Decoder for NetworkMessageCodec {
    type Item = NetworkMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(prefix) = src.get(..LENGTH_PREFIX) else {
            return Ok(None);
        };
        let mut len_bytes = [0u8; LENGTH_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(len);
        decode(&frame).map(Some)
    }
}
