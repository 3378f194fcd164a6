use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed-size header: payload byte length, little-endian u32.
pub const HEADER_LEN: usize = 4;

/// Upper bound on a single payload. Anything larger is a protocol error
/// and closes the connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversize(usize),

    #[error("frame payload is not valid UTF-8")]
    Encoding,

    #[error("connection closed mid-frame")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Accumulates raw bytes and yields complete payloads. A short read never
/// yields a frame early; leftover bytes wait for the next chunk.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame, or `None` when more bytes are needed.
    pub fn try_next(&mut self) -> Result<Option<String>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::Oversize(len));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);
        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| FrameError::Encoding)
    }
}

/// Async frame source over any byte stream.
pub struct FrameReader<R> {
    inner: R,
    buf: FrameBuffer,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: FrameBuffer::new(),
        }
    }

    /// Next complete payload, `None` on clean EOF between frames.
    /// Cancel safe: bytes already read stay in the buffer.
    pub async fn next(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            if let Some(payload) = self.buf.try_next()? {
                return Ok(Some(payload));
            }
            let read = self.inner.read_buf(&mut self.buf.buf).await?;
            if read == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::Truncated)
                };
            }
        }
    }
}

/// Frame a payload and write it out.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &str,
) -> Result<(), FrameError> {
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversize(bytes.len()));
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    frame.extend_from_slice(bytes);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
