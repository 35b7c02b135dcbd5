//! Async frame reader
//!
//! Isolates one complete packet at a time from a byte stream: the header
//! byte, one to four remaining-length bytes, then exactly
//! `remaining_length` body bytes. The size limit counts the whole packet,
//! fixed header included.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::DecodeError;

/// One undecoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet type nibble and flags nibble
    pub header: u8,
    pub body: Bytes,
}

/// Errors produced while framing
#[derive(Debug)]
pub enum FrameError {
    Io(io::Error),
    Decode(DecodeError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Decode(e) => write!(f, "framing error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl From<DecodeError> for FrameError {
    fn from(e: DecodeError) -> Self {
        FrameError::Decode(e)
    }
}

/// Reads whole frames from an `AsyncRead`
pub struct FrameReader<R> {
    inner: R,
    /// Largest accepted packet, header and length bytes included
    max_packet_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_packet_size: usize::MAX,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Next frame, or `None` on a clean end of stream between frames
    ///
    /// End of stream inside a frame is `UnexpectedEof`.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut header = [0u8; 1];
        if self.inner.read(&mut header).await? == 0 {
            return Ok(None);
        }

        let mut remaining_length: u32 = 0;
        let mut length_bytes = 0;
        let mut terminated = false;
        for i in 0..4 {
            length_bytes += 1;
            let byte = self.inner.read_u8().await?;
            remaining_length |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                terminated = true;
                break;
            }
        }
        if !terminated {
            return Err(DecodeError::MalformedVariableInt.into());
        }

        let remaining_length = remaining_length as usize;
        let packet_size = 1 + length_bytes + remaining_length;
        if packet_size > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge(packet_size).into());
        }

        let mut body = BytesMut::zeroed(remaining_length);
        self.inner.read_exact(&mut body).await?;

        Ok(Some(Frame {
            header: header[0],
            body: body.freeze(),
        }))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
