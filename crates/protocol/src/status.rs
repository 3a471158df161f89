//! Response status codes.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;
use crate::frame::{read_string, read_u64};

/// Result code prefixing every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum StatusCode {
    Ok = 10,
    NotFound = 20,
    InvalidRequest = 21,
    Internal = 30,
}

impl StatusCode {
    pub const fn as_u64(self) -> u64 {
        self as u64
    }

    pub const fn from_u64(value: u64) -> Option<Self> {
        match value {
            10 => Some(Self::Ok),
            20 => Some(Self::NotFound),
            21 => Some(Self::InvalidRequest),
            30 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether a message follows this code on the wire.
    pub const fn carries_message(self) -> bool {
        matches!(self, Self::InvalidRequest | Self::Internal)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::NotFound => "not found",
            Self::InvalidRequest => "invalid request",
            Self::Internal => "internal error",
        };
        write!(f, "{name} ({})", self.as_u64())
    }
}

impl TryFrom<u64> for StatusCode {
    type Error = WireError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_u64(value)
            .ok_or_else(|| WireError::Protocol(format!("unknown status code: {value}")))
    }
}

/// Writes a bare status code.
pub async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: StatusCode,
) -> Result<(), WireError> {
    writer.write_u64_le(code.as_u64()).await?;
    Ok(())
}

/// Writes a status code followed by a length-prefixed message.
pub async fn write_status_with_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    code: StatusCode,
    msg: &str,
) -> Result<(), WireError> {
    writer.write_u64_le(code.as_u64()).await?;
    writer.write_u64_le(msg.len() as u64).await?;
    writer.write_all(msg.as_bytes()).await?;
    Ok(())
}

/// Reads a status code.
///
/// Codes outside [`StatusCode`] are a [`WireError::Protocol`] error.
pub async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> Result<StatusCode, WireError> {
    let raw = read_u64(reader, "status code").await?;
    StatusCode::try_from(raw)
}

/// Reads the message that follows an `InvalidRequest` or `Internal` code.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, WireError> {
    read_string(reader, "status message").await
}
