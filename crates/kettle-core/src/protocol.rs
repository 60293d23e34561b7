//! Wire protocol for daemon communication
//!
//! Frames are a 4-byte big-endian length followed by a msgpack body.

use crate::{CompilationResult, SandboxStatus};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Largest source submission
pub const MAX_SOURCE_LEN: usize = 1024 * 1024;

/// Message shown when a submission has no code in it
pub const EMPTY_SUBMISSION: &str = "Code cannot be empty.";

/// Request types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Compile and run one source file
    CompileAndRun { source: String },
    /// Get sandbox status
    Status,
    /// Ping
    Ping,
}

/// Response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Outcome of a compile-and-run
    Result(CompilationResult),
    /// Submission refused before reaching the sandbox
    Rejected { message: String },
    /// Sandbox status
    Status(SandboxStatus),
    /// Pong
    Pong,
    /// Error
    Error { message: String },
}

/// Why a submission never reached the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("Code cannot be empty.")]
    Empty,
    #[error("Code is too large ({0} bytes, limit {limit}).", limit = MAX_SOURCE_LEN)]
    TooLarge(usize),
}

/// Caller-side gate in front of [`crate::Sandbox::compile_and_run`].
pub fn validate_submission(source: &str) -> Result<&str, SubmissionError> {
    if source.trim().is_empty() {
        return Err(SubmissionError::Empty);
    }
    if source.len() > MAX_SOURCE_LEN {
        return Err(SubmissionError::TooLarge(source.len()));
    }
    Ok(source)
}

/// Encode a message to msgpack
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(stream: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame too large: {} bytes", body.len()),
            )
        })?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await
}

/// Read one length-prefixed frame. `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R, T>(stream: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    decode(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
