//! Chunk frame encoding.
//!
//! A frame is `[filename_len][filename][id][size]` followed by exactly
//! `size` body bytes. The decoder never reads past the body, so several
//! frames (or a frame followed by other data) can share one stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Take};

use crate::chunk::Chunk;
use crate::error::WireError;
use crate::{MAX_FILENAME_LEN, MAX_MESSAGE_LEN};

/// Writes a length-prefixed filename.
pub async fn write_filename<W: AsyncWrite + Unpin>(
    writer: &mut W,
    filename: &str,
) -> Result<(), WireError> {
    let bytes = filename.as_bytes();
    if bytes.len() as u64 > MAX_FILENAME_LEN {
        return Err(WireError::FilenameTooLong(bytes.len()));
    }

    writer.write_u64_le(bytes.len() as u64).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Reads a length-prefixed filename.
pub async fn read_filename<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, WireError> {
    let len = read_u64(reader, "filename length").await?;
    if len > MAX_FILENAME_LEN {
        return Err(WireError::Decode(format!(
            "filename length {len} exceeds {MAX_FILENAME_LEN}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| WireError::read("filename", e))?;
    String::from_utf8(buf).map_err(|e| WireError::Decode(format!("invalid UTF-8 filename: {e}")))
}

/// Writes a chunk frame, streaming exactly `chunk.size` bytes of the body.
///
/// Fails with [`WireError::ShortBody`] if the body runs dry early. Extra
/// body bytes beyond `size` are left unread.
pub async fn write_chunk_frame<W, B>(writer: &mut W, chunk: Chunk<B>) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    B: AsyncRead + Unpin,
{
    write_filename(writer, &chunk.filename).await?;
    writer.write_u64_le(chunk.id).await?;
    writer.write_u64_le(chunk.size).await?;

    let mut body = chunk.body.take(chunk.size);
    let written = tokio::io::copy(&mut body, writer).await?;
    if written < chunk.size {
        return Err(WireError::ShortBody {
            written,
            expected: chunk.size,
        });
    }
    Ok(())
}

/// Reads a chunk frame header and returns the chunk with a bounded body.
///
/// The body is a [`Take`] over `reader` limited to `size` bytes; the caller
/// must drain it before reading anything else from the same stream.
pub async fn read_chunk_frame<R: AsyncRead + Unpin>(
    mut reader: R,
) -> Result<Chunk<Take<R>>, WireError> {
    let filename = read_filename(&mut reader).await?;
    let id = read_u64(&mut reader, "chunk id").await?;
    let size = read_u64(&mut reader, "chunk size").await?;

    Ok(Chunk {
        id,
        filename,
        size,
        body: reader.take(size),
    })
}

pub(crate) async fn read_u64<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &str,
) -> Result<u64, WireError> {
    reader
        .read_u64_le()
        .await
        .map_err(|e| WireError::read(field, e))
}

/// Reads a length-prefixed UTF-8 string bounded by [`MAX_MESSAGE_LEN`].
///
/// Invalid UTF-8 is replaced rather than rejected: messages are diagnostics.
pub(crate) async fn read_string<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &str,
) -> Result<String, WireError> {
    let len = read_u64(reader, field).await?;
    if len > MAX_MESSAGE_LEN {
        return Err(WireError::Decode(format!(
            "{field} length {len} exceeds {MAX_MESSAGE_LEN}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| WireError::read(field, e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode(filename: &str, id: u64, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let chunk = Chunk::new(filename, id, body.len() as u64, body);
        write_chunk_frame(&mut buf, chunk).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn chunk_frame_roundtrip() {
        let buf = encode("movies/holiday.mp4", 7, b"chunk body bytes").await;

        let mut chunk = read_chunk_frame(&buf[..]).await.unwrap();
        assert_eq!(chunk.id, 7);
        assert_eq!(chunk.filename, "movies/holiday.mp4");
        assert_eq!(chunk.size, 16);

        let mut body = Vec::new();
        chunk.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"chunk body bytes");
    }

    #[tokio::test]
    async fn frame_layout_is_little_endian() {
        let buf = encode("ab", 1, b"xyz").await;

        let mut expected = Vec::new();
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&3u64.to_le_bytes());
        expected.extend_from_slice(b"xyz");
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn empty_body_roundtrip() {
        let buf = encode("empty", 0, b"").await;

        let mut chunk = read_chunk_frame(&buf[..]).await.unwrap();
        assert_eq!(chunk.size, 0);
        let mut body = Vec::new();
        chunk.body.read_to_end(&mut body).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn body_reader_stops_at_frame_boundary() {
        let mut buf = encode("f", 0, b"first").await;
        buf.extend(encode("f", 1, b"second").await);

        let mut cursor = &buf[..];

        let mut first = read_chunk_frame(&mut cursor).await.unwrap();
        let mut body = Vec::new();
        first.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"first");

        let mut second = read_chunk_frame(&mut cursor).await.unwrap();
        assert_eq!(second.id, 1);
        let mut body = Vec::new();
        second.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"second");
    }

    #[tokio::test]
    async fn write_uses_only_declared_size() {
        let mut buf = Vec::new();
        let chunk = Chunk::new("f", 0, 3, &b"abcdef"[..]);
        write_chunk_frame(&mut buf, chunk).await.unwrap();

        let mut chunk = read_chunk_frame(&buf[..]).await.unwrap();
        let mut body = Vec::new();
        chunk.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"abc");
    }

    #[tokio::test]
    async fn short_body_is_rejected() {
        let mut buf = Vec::new();
        let chunk = Chunk::new("f", 0, 10, &b"abc"[..]);
        let result = write_chunk_frame(&mut buf, chunk).await;
        assert!(matches!(
            result,
            Err(WireError::ShortBody {
                written: 3,
                expected: 10
            })
        ));
    }

    #[tokio::test]
    async fn truncated_filename_is_decode_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u64.to_le_bytes());
        buf.extend_from_slice(b"abc");

        let result = read_chunk_frame(&buf[..]).await;
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[tokio::test]
    async fn truncated_header_is_decode_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(b"a");
        buf.extend_from_slice(&[0u8; 4]);

        let result = read_chunk_frame(&buf[..]).await;
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[tokio::test]
    async fn oversized_filename_length_is_rejected() {
        let buf = (MAX_FILENAME_LEN + 1).to_le_bytes();
        let result = read_chunk_frame(&buf[..]).await;
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[tokio::test]
    async fn filename_too_long_on_write() {
        let long_name = "a".repeat(MAX_FILENAME_LEN as usize + 1);
        let mut buf = Vec::new();
        let result = write_filename(&mut buf, &long_name).await;
        assert!(matches!(result, Err(WireError::FilenameTooLong(_))));
    }

    #[tokio::test]
    async fn invalid_utf8_filename_is_decode_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&[0xff, 0xfe]);

        let mut cursor = &buf[..];
        let result = read_filename(&mut cursor).await;
        assert!(matches!(result, Err(WireError::Decode(_))));
    }
}
