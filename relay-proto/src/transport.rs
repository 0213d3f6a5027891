//! Abridged TCP framing.
//!
//! The lightest framing variant: after an `0xef` marker byte on connect,
//! every packet in either direction is `[len/4 as one byte][payload]`, or
//! `[0x7f][len/4 as three LE bytes][payload]` once `len/4` reaches 127.
//! Payload lengths are always multiples of 4.
//!
//! The functions are generic over the stream halves so tests can run them
//! over in-memory pipes.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Marker byte announcing abridged framing, written once per connection.
pub const INIT_MARKER: u8 = 0xef;

/// Write the one-time framing marker.
pub async fn send_init<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&[INIT_MARKER]).await
}

/// Write one framed packet.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    debug_assert_eq!(data.len() % 4, 0, "frame payloads are word-aligned");
    let words = data.len() / 4;
    if words < 127 {
        writer.write_all(&[words as u8]).await?;
    } else {
        writer
            .write_all(&[
                0x7f,
                (words & 0xff) as u8,
                ((words >> 8) & 0xff) as u8,
                ((words >> 16) & 0xff) as u8,
            ])
            .await?;
    }
    writer.write_all(data).await
}

/// Read one framed packet.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut head = [0u8; 1];
    reader.read_exact(&mut head).await?;
    let words = if head[0] < 0x7f {
        head[0] as usize
    } else {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest).await?;
        rest[0] as usize | (rest[1] as usize) << 8 | (rest[2] as usize) << 16
    };
    let mut payload = vec![0u8; words * 4];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let payload = vec![0x11u8; 8];
        send_init(&mut a).await.unwrap();
        write_frame(&mut a, &payload).await.unwrap();

        let mut marker = [0u8; 1];
        b.read_exact(&mut marker).await.unwrap();
        assert_eq!(marker[0], INIT_MARKER);
        assert_eq!(read_frame(&mut b).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn long_frame_uses_extended_header() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        // 127 words won't fit the single-byte header.
        let payload = vec![0xa5u8; 127 * 4];
        write_frame(&mut a, &payload).await.unwrap();

        let mut head = [0u8; 1];
        b.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 0x7f);
        let mut rest = [0u8; 3];
        b.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [127, 0, 0]);
        let mut body = vec![0u8; payload.len()];
        b.read_exact(&mut body).await.unwrap();
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn boundary_frame_is_single_byte() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let payload = vec![0u8; 126 * 4];
        write_frame(&mut a, &payload).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), payload);
    }
}
