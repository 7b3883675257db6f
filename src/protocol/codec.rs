// src/protocol/codec.rs

//! Length-prefixed CBOR framing for stream transports.
//!
//! Each frame is a big-endian `u32` body length followed by the CBOR
//! encoding of one [`Upstream`](super::Upstream) or
//! [`Downstream`](super::Downstream) value.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body. Larger frames close the connection.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Upper bound on the buffer reserved before a frame body arrives.
const READ_CHUNK: usize = 64 * 1024;

/// Encode `frame` with its length prefix.
pub fn encode<T: Serialize>(frame: &T) -> Result<Bytes> {
    // ---
    let mut body = Vec::new();
    ciborium::ser::into_writer(frame, &mut body).map_err(|e| Error::Codec(e.to_string()))?;

    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            body.len()
        )));
    }

    let mut out = BytesMut::with_capacity(PREFIX_LEN + body.len());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    Ok(out.freeze())
}

/// Decode one frame body (without the length prefix).
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::de::from_reader(body).map_err(|e| Error::Codec(e.to_string()))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    // ---
    let bytes = encode(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    // ---
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(Error::Codec(format!(
            "incoming frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }

    // grows with the bytes actually received
    let mut body = Vec::with_capacity(len.min(READ_CHUNK));
    (&mut *reader).take(len as u64).read_to_end(&mut body).await?;
    if body.len() < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame truncated at {} of {len} bytes", body.len()),
        )
        .into());
    }
    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        // ---
        domain::{Envelope, Payload, Topics},
        endpoint::Delivery,
        protocol::{Downstream, Upstream},
    };

    #[test]
    fn prefix_matches_body_length() {
        // ---
        let frame = Upstream::Request {
            peer_id: "rx".into(),
            level: Delivery::Synced,
            want: 12,
        };
        let bytes = encode(&frame).expect("encode");

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - PREFIX_LEN);
        assert_eq!(decode::<Upstream>(&bytes[PREFIX_LEN..]).expect("decode"), frame);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        // ---
        let err = decode::<Downstream>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[tokio::test]
    async fn frames_survive_a_byte_stream() {
        // ---
        let mut topics = Topics::new();
        topics.insert("main".into(), Payload::with_data("{\"n\":1}", vec![1u8, 2, 3]));
        let frames = vec![
            Downstream::Welcome {
                sender_id: "tx".into(),
                next_id: 5,
            },
            Downstream::Data(Envelope::new(5, topics)),
        ];

        let (mut a, mut b) = tokio::io::duplex(1024);
        for frame in &frames {
            write_frame(&mut a, frame).await.expect("write");
        }
        drop(a);

        let mut seen = Vec::new();
        while let Some(frame) = read_frame::<_, Downstream>(&mut b).await.expect("read") {
            seen.push(frame);
        }
        assert_eq!(seen, frames);
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        // ---
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_LEN + 1) as u32).await.expect("write");

        let err = read_frame::<_, Upstream>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        // ---
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(100 * 1024 * 1024).await.expect("write");
        a.write_all(&[1, 2, 3]).await.expect("write");
        drop(a);

        let err = read_frame::<_, Upstream>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }
}
