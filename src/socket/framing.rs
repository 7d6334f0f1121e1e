//! Wire codec for the engine's local stream.
//!
//! Every message on the stream is a length-prefixed frame:
//!
//! ```text
//! [u16 BE length] [payload: length bytes]
//! ```
//!
//! The payload is opaque at this layer. Envelope tags and bodies are
//! interpreted by the protocol families built on top (`command::protocol`,
//! `profile::protocol`).
//!
//! Reads are two-phase: exactly 2 bytes of length, then exactly that many
//! payload bytes. Writes send length and payload as one buffer.
//! [`FrameReader`] and [`FrameWriter`] take `&mut self`, so a split stream can
//! have one read and one write in flight at the same time but never two of
//! either.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Errors raised by the framed transport.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream on a frame boundary.
    #[error("stream closed")]
    Closed,

    /// The stream ended after some but not all of a frame arrived.
    #[error("stream ended mid-frame: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes the frame header announced.
        expected: usize,
        /// Bytes actually received before EOF.
        got: usize,
    },

    /// Payload does not fit the 2-byte length field.
    #[error("frame payload too large: {0} bytes (max {MAX_PAYLOAD_SIZE})")]
    TooLarge(usize),

    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode `payload` into a wire frame.
///
/// Returns `[u16 BE length][payload]`, exactly `2 + payload.len()` bytes.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = u16::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode one complete frame from the front of `bytes`.
///
/// Returns the payload and the number of bytes consumed, or `None` when
/// `bytes` does not yet hold a whole frame. The session itself reads through
/// [`FrameReader`]; this is for tests and tools that inspect captured bytes.
pub fn decode_frame(bytes: &[u8]) -> Option<(&[u8], usize)> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    let length = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let total = LENGTH_PREFIX_SIZE + length;
    if bytes.len() < total {
        return None;
    }
    Some((&bytes[LENGTH_PREFIX_SIZE..total], total))
}

/// Read side of a framed stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap the read half of a stream.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Receive the next frame's payload.
    ///
    /// Blocks until a full frame has arrived. EOF before the first length
    /// byte yields [`FrameError::Closed`]; EOF anywhere later yields
    /// [`FrameError::Truncated`].
    pub async fn read(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        let got = read_full(&mut self.inner, &mut header).await?;
        if got == 0 {
            return Err(FrameError::Closed);
        }
        if got < LENGTH_PREFIX_SIZE {
            return Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                got,
            });
        }

        let length = u16::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; length];
        let got = read_full(&mut self.inner, &mut payload).await?;
        if got < length {
            return Err(FrameError::Truncated {
                expected: length,
                got,
            });
        }
        Ok(payload)
    }
}

/// Fill `buf` completely unless EOF arrives first. Returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Write side of a framed stream.
#[derive(Debug)]
pub struct FrameWriter<W: AsyncWrite> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap the write half of a stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Send one frame and flush it to the peer.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        self.feed(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Queue one frame without flushing.
    ///
    /// The frame is not necessarily final: more frames may follow on the same
    /// connection before the next [`FrameWriter::write`] or
    /// [`FrameWriter::flush`] pushes them out together.
    pub async fn feed(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(payload)?;
        self.inner.write_all(&frame).await?;
        Ok(())
    }

    /// Flush any frames queued by [`FrameWriter::feed`].
    pub async fn flush(&mut self) -> Result<(), FrameError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write side of the stream.
    pub async fn close(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
