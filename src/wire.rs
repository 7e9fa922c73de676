//! Multipart wire format.
//!
//! Every message on the wire is a multipart message: an ordered sequence of
//! frames transmitted atomically as one unit. The encoding is a big-endian
//! u32 frame count followed by each frame as a big-endian u32 length and the
//! frame bytes. Frame count and frame length are bounded so a malformed or
//! hostile peer cannot force unbounded allocation.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A single frame of a multipart message.
pub type Frame = Bytes;

/// Maximum number of frames in one multipart message.
pub const MAX_FRAMES: u32 = 1024;

/// Maximum length of a single frame in bytes (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Errors produced while encoding or decoding multipart messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o failure on framed stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame count {0} exceeds limit {MAX_FRAMES}")]
    TooManyFrames(u64),

    #[error("frame length {0} exceeds limit {MAX_FRAME_LEN}")]
    FrameTooLarge(u64),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// An ordered sequence of frames delivered as one atomic unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart(Vec<Frame>);

impl Multipart {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A message consisting of a single frame.
    pub fn single(frame: impl Into<Frame>) -> Self {
        Self(vec![frame.into()])
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self(frames)
    }

    pub fn first(&self) -> Option<&Frame> {
        self.0.first()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Write one multipart message to the stream and flush it.
///
/// Bounds are checked on the native lengths before anything is written, so
/// an oversized message is rejected whole and the stream stays at a
/// message boundary.
pub async fn write_multipart<W>(writer: &mut W, message: &Multipart) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if message.len() > MAX_FRAMES as usize {
        return Err(WireError::TooManyFrames(message.len() as u64));
    }
    for frame in message.frames() {
        if frame.len() > MAX_FRAME_LEN as usize {
            return Err(WireError::FrameTooLarge(frame.len() as u64));
        }
    }

    writer.write_u32(message.len() as u32).await?;
    for frame in message.frames() {
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read one multipart message from the stream.
///
/// A connection closed at a message boundary surfaces as an
/// `UnexpectedEof` i/o error; callers treat any error as a disconnect.
pub async fn read_multipart<R>(reader: &mut R) -> Result<Multipart>
where
    R: AsyncRead + Unpin,
{
    let count = reader.read_u32().await?;
    if count > MAX_FRAMES {
        return Err(WireError::TooManyFrames(count as u64));
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(len as u64));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        frames.push(Bytes::from(buf));
    }
    Ok(Multipart::from_frames(frames))
}
