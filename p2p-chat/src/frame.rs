//! Wire framing for the chat stream.
//!
//! Two frame kinds share the connection:
//!
//! ```text
//! t<utf-8 body>\n
//! f<decimal length>|<extension>|<length raw bytes>
//! ```
//!
//! A text frame whose body is [`SENTINEL`] announces that the peer is leaving
//! and decodes to [`Frame::Goodbye`] instead of ordinary text.

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TEXT_TAG: u8 = b't';
const FILE_TAG: u8 = b'f';
const FIELD_DELIMITER: u8 = b'|';
const LINE_DELIMITER: u8 = b'\n';

/// Reserved text body signalling a graceful exit. Never shown to the user.
pub const SENTINEL: &str = "\0SENDEREXIT";

/// Default upper bound on a received file payload (256 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default upper bound on a received text body (1 MiB).
pub const DEFAULT_MAX_TEXT_LEN: u64 = 1024 * 1024;

// u64::MAX has 20 decimal digits.
const MAX_LENGTH_DIGITS: usize = 20;
const MAX_EXTENSION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    File(FileFrame),
    Goodbye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFrame {
    /// Extension including the leading dot, or empty.
    pub extension: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_file_size: u64,
    /// Longest text body accepted, not counting the trailing newline.
    pub max_text_len: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("text body contains a newline")]
    EmbeddedNewline,
    #[error("text body is reserved for the exit signal")]
    ReservedBody,
    #[error("file extension {0:?} cannot be framed")]
    InvalidExtension(String),
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("invalid file length field")]
    InvalidLength,
    #[error("file of {length} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { length: u64, limit: u64 },
    #[error("file extension field is longer than 255 bytes")]
    ExtensionTooLong,
    #[error("text frame exceeds the {limit} byte limit")]
    TextTooLong { limit: u64 },
    #[error("text frame is not valid utf-8")]
    InvalidUtf8,
    #[error("stream ended in the middle of a frame")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Frame {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    pub fn file(extension: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::File(FileFrame {
            extension: extension.into(),
            payload,
        })
    }

    /// Serializes the frame into its wire bytes.
    ///
    /// Bodies the wire format cannot carry are refused rather than altered.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Frame::Text(body) => {
                if body == SENTINEL {
                    return Err(FrameError::ReservedBody);
                }
                encode_text(body)
            }
            Frame::Goodbye => encode_text(SENTINEL),
            Frame::File(file) => {
                if !is_valid_extension(&file.extension) {
                    return Err(FrameError::InvalidExtension(file.extension.clone()));
                }
                let header = format!("{}|{}|", file.payload.len(), file.extension);
                let mut encoded = Vec::with_capacity(1 + header.len() + file.payload.len());
                encoded.push(FILE_TAG);
                encoded.extend_from_slice(header.as_bytes());
                encoded.extend_from_slice(&file.payload);
                Ok(encoded)
            }
        }
    }
}

fn encode_text(body: &str) -> Result<Vec<u8>, FrameError> {
    if body.as_bytes().contains(&LINE_DELIMITER) {
        return Err(FrameError::EmbeddedNewline);
    }
    let mut encoded = Vec::with_capacity(body.len() + 2);
    encoded.push(TEXT_TAG);
    encoded.extend_from_slice(body.as_bytes());
    encoded.push(LINE_DELIMITER);
    Ok(encoded)
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame. Returns `Ok(None)` when the stream closes cleanly
/// between frames.
pub async fn read_frame<R>(reader: &mut R, limits: &FrameLimits) -> Result<Option<Frame>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    match tag {
        TEXT_TAG => read_text(reader, limits.max_text_len).await.map(Some),
        FILE_TAG => read_file(reader, limits).await.map(Some),
        other => Err(FrameError::UnknownTag(other)),
    }
}

async fn read_text<R>(reader: &mut R, max_len: u64) -> Result<Frame, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let budget = max_len.saturating_add(1);
    (&mut *reader)
        .take(budget)
        .read_until(LINE_DELIMITER, &mut line)
        .await?;
    if line.last() != Some(&LINE_DELIMITER) {
        if line.len() as u64 == budget {
            return Err(FrameError::TextTooLong { limit: max_len });
        }
        return Err(FrameError::Truncated);
    }
    line.pop();
    let body = String::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
    if body == SENTINEL {
        return Ok(Frame::Goodbye);
    }
    Ok(Frame::Text(body))
}

async fn read_file<R>(reader: &mut R, limits: &FrameLimits) -> Result<Frame, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let digits = read_field(reader, MAX_LENGTH_DIGITS).await?.ok_or(FrameError::InvalidLength)?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidLength);
    }
    let length: u64 = std::str::from_utf8(&digits)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or(FrameError::InvalidLength)?;
    if length > limits.max_file_size {
        return Err(FrameError::PayloadTooLarge {
            length,
            limit: limits.max_file_size,
        });
    }

    let extension = read_field(reader, MAX_EXTENSION_LEN)
        .await?
        .ok_or(FrameError::ExtensionTooLong)?;
    let extension = String::from_utf8(extension).map_err(|_| FrameError::InvalidUtf8)?;
    if !is_valid_extension(&extension) {
        return Err(FrameError::InvalidExtension(extension));
    }

    let length = usize::try_from(length).map_err(|_| FrameError::PayloadTooLarge {
        length,
        limit: limits.max_file_size,
    })?;
    let mut payload = vec![0; length];
    reader.read_exact(&mut payload).await.map_err(truncated)?;

    Ok(Frame::File(FileFrame { extension, payload }))
}

/// Reads bytes up to the next `|`. Returns `Ok(None)` if more than `max_len`
/// bytes precede the delimiter.
async fn read_field<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut field = Vec::new();
    loop {
        let byte = reader.read_u8().await.map_err(truncated)?;
        if byte == FIELD_DELIMITER {
            return Ok(Some(field));
        }
        if field.len() == max_len {
            return Ok(None);
        }
        field.push(byte);
    }
}

/// An extension is empty or a dot-led suffix that can neither break the
/// framing nor name another directory once appended to a file name.
fn is_valid_extension(extension: &str) -> bool {
    if extension.is_empty() {
        return true;
    }
    extension.starts_with('.')
        && extension.len() <= MAX_EXTENSION_LEN
        && !extension
            .bytes()
            .any(|b| matches!(b, FIELD_DELIMITER | LINE_DELIMITER | b'/' | b'\\' | 0))
}

fn truncated(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Truncated
    } else {
        FrameError::Io(err)
    }
}

/// Suffix of the file name starting at its final `.`, or empty.
///
/// A leading dot counts, so `.bashrc` has the extension `.bashrc`.
pub fn file_extension(path: &str) -> &str {
    let name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(index) => &name[index..],
        None => "",
    }
}

/// Removes double quotes and surrounding whitespace from a pasted path.
pub fn strip_quotes(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}
