//! Frame encoding and decoding for the relay wire protocol.
//!
//! Every message on a relay connection is one self-delimited frame:
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────────────┐
//! │ type: u8 │ length: u32 (BE) │ payload (length B)  │
//! └──────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! Length is explicit, so payloads may carry any byte value including zero.
//! The codec imposes no payload ceiling of its own; callers that expect small
//! control frames opt into one with [`FrameDecoder::with_max_payload`].

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::{ProtocolError, RelayError};

/// Fixed frame header size in bytes (type + length)
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest slice of payload buffer grown per read, so a hostile length field
/// cannot force a huge allocation before any bytes arrive.
const PAYLOAD_GROW_STEP: usize = 64 * 1024;

/// Frame types understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Register a download session (client → relay)
    RegisterDownload = 0x01,
    /// Register an upload session (client → relay)
    RegisterUpload = 0x02,
    /// Allocated rendezvous port (relay → client)
    PortAlloc = 0x03,
    /// File bytes (either direction)
    Data = 0x04,
    /// Clean end of stream (either direction)
    Eof = 0x05,
    /// Failure reason as UTF-8 text (relay → client)
    Error = 0x06,
    /// Username and secret (client → relay)
    Auth = 0x07,
    /// Authentication accepted (relay → client)
    AuthOk = 0x08,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::RegisterDownload),
            0x02 => Ok(Self::RegisterUpload),
            0x03 => Ok(Self::PortAlloc),
            0x04 => Ok(Self::Data),
            0x05 => Ok(Self::Eof),
            0x06 => Ok(Self::Error),
            0x07 => Ok(Self::Auth),
            0x08 => Ok(Self::AuthOk),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl FrameType {
    /// Wire tag of this frame type
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type tag
    pub frame_type: FrameType,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a type and payload
    pub fn new(frame_type: FrameType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Payload interpreted as relay-supplied text (lossy for invalid UTF-8)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Encode one frame into a freshly allocated buffer.
///
/// The returned buffer owns a copy of `payload`, so the caller may reuse its
/// slice as soon as this returns.
pub fn encode_frame(frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.push(frame_type.as_u8());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write one frame as a single logical write, then flush.
pub async fn write_frame<W>(
    writer: &mut W,
    frame_type: FrameType,
    payload: &[u8],
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let buf = encode_frame(frame_type, payload)?;
    writer.write_all(&buf).await.map_err(RelayError::Connection)?;
    writer.flush().await.map_err(RelayError::Connection)?;
    Ok(())
}

/// Read exactly one frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    FrameDecoder::new().decode(reader).await
}

#[derive(Debug)]
enum DecodeState {
    Header {
        buf: [u8; FRAME_HEADER_LEN],
        filled: usize,
    },
    Payload {
        frame_type: FrameType,
        len: usize,
        buf: Vec<u8>,
    },
    /// A protocol violation left the stream at an unknown offset
    Failed,
}

impl Default for DecodeState {
    fn default() -> Self {
        DecodeState::Header {
            buf: [0; FRAME_HEADER_LEN],
            filled: 0,
        }
    }
}

/// Incremental frame decoder.
///
/// Keeps partial header/payload bytes between polls, which lets a poll-based
/// reader (see [`crate::UploadStream`]) resume a frame that arrived across
/// several TLS records. A protocol violation poisons the decoder: the byte
/// stream can no longer be split into frames, so every later poll fails with
/// [`ProtocolError::Desynchronized`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecodeState,
    max_payload: Option<usize>,
}

impl FrameDecoder {
    /// Decoder with no payload ceiling
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that rejects frames whose declared payload exceeds `limit`
    pub fn with_max_payload(limit: usize) -> Self {
        Self {
            state: DecodeState::default(),
            max_payload: Some(limit),
        }
    }

    /// Await the next complete frame
    pub async fn decode<R>(&mut self, reader: &mut R) -> Result<Frame, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        poll_fn(|cx| self.poll_decode(cx, Pin::new(&mut *reader))).await
    }

    /// Poll for the next complete frame.
    ///
    /// A peer that closes the stream, at a frame boundary or mid-frame, is
    /// reported as [`RelayError::Closed`].
    pub fn poll_decode<R>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
    ) -> Poll<Result<Frame, RelayError>>
    where
        R: AsyncRead + ?Sized,
    {
        loop {
            match &mut self.state {
                DecodeState::Header { buf, filled } => {
                    if *filled == FRAME_HEADER_LEN {
                        let frame_type = match FrameType::try_from(buf[0]) {
                            Ok(frame_type) => frame_type,
                            Err(err) => {
                                self.state = DecodeState::Failed;
                                return Poll::Ready(Err(err.into()));
                            }
                        };
                        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
                        if self.max_payload.is_some_and(|limit| len > limit) {
                            self.state = DecodeState::Failed;
                            return Poll::Ready(Err(ProtocolError::PayloadTooLarge(len).into()));
                        }
                        self.state = DecodeState::Payload {
                            frame_type,
                            len,
                            buf: Vec::with_capacity(len.min(PAYLOAD_GROW_STEP)),
                        };
                        continue;
                    }

                    let mut read_buf = ReadBuf::new(&mut buf[*filled..]);
                    ready!(reader.as_mut().poll_read(cx, &mut read_buf)).map_err(map_read_error)?;
                    let n = read_buf.filled().len();
                    if n == 0 {
                        self.state = DecodeState::default();
                        return Poll::Ready(Err(RelayError::Closed));
                    }
                    *filled += n;
                }
                DecodeState::Payload {
                    frame_type,
                    len,
                    buf,
                } => {
                    let filled = buf.len();
                    if filled == *len {
                        let frame = Frame {
                            frame_type: *frame_type,
                            payload: std::mem::take(buf),
                        };
                        self.state = DecodeState::default();
                        return Poll::Ready(Ok(frame));
                    }

                    let step = (*len - filled).min(PAYLOAD_GROW_STEP);
                    buf.resize(filled + step, 0);
                    let mut read_buf = ReadBuf::new(&mut buf[filled..]);
                    let polled = reader.as_mut().poll_read(cx, &mut read_buf);
                    let n = read_buf.filled().len();
                    buf.truncate(filled + n);
                    ready!(polled).map_err(map_read_error)?;
                    if n == 0 {
                        self.state = DecodeState::default();
                        return Poll::Ready(Err(RelayError::Closed));
                    }
                }
                DecodeState::Failed => {
                    return Poll::Ready(Err(ProtocolError::Desynchronized.into()));
                }
            }
        }
    }
}

fn map_read_error(err: io::Error) -> RelayError {
    // rustls reports a peer that vanished without close_notify as UnexpectedEof
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RelayError::Closed
    } else {
        RelayError::Connection(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[test]
    fn test_frame_type_tags() {
        for tag in 0x01..=0x08u8 {
            let frame_type = FrameType::try_from(tag).unwrap();
            assert_eq!(frame_type.as_u8(), tag);
        }
        assert_eq!(
            FrameType::try_from(0x00),
            Err(ProtocolError::UnknownFrameType(0x00))
        );
        assert_eq!(
            FrameType::try_from(0x09),
            Err(ProtocolError::UnknownFrameType(0x09))
        );
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode_frame(FrameType::Data, &[0, 1, 0, 2]).unwrap();
        assert_eq!(buf, vec![0x04, 0, 0, 0, 4, 0, 1, 0, 2]);

        let buf = encode_frame(FrameType::Eof, &[]).unwrap();
        assert_eq!(buf, vec![0x05, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, FrameType::Error, b"no such session").await.unwrap();
        write_frame(&mut a, FrameType::AuthOk, &[]).await.unwrap();

        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Error);
        assert_eq!(frame.text(), "no such session");

        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame, Frame::new(FrameType::AuthOk, Vec::new()));
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (mut a, mut b) = duplex(4);
        let payload: Vec<u8> = (0..200u8).collect();
        let encoded = encode_frame(FrameType::Data, &payload).unwrap();

        let writer = tokio::spawn(async move {
            for piece in encoded.chunks(3) {
                a.write_all(piece).await.unwrap();
            }
            a
        });

        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.payload, payload);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_type_is_protocol_error() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x7F, 0, 0, 0, 1, 0xAA]).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::UnknownFrameType(0x7F))
        ));
    }

    #[tokio::test]
    async fn test_decoder_poisoned_after_unknown_type() {
        let (mut a, mut b) = duplex(64);
        // the bad frame's payload looks like a Data header followed by "BAD"
        a.write_all(&[0xEE, 0, 0, 0, 5, 0x04, 0, 0, 0, 3]).await.unwrap();
        a.write_all(b"BAD").await.unwrap();

        let mut decoder = FrameDecoder::new();
        let err = decoder.decode(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::UnknownFrameType(0xEE))
        ));

        let err = decoder.decode(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::Desynchronized)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_at_boundary() {
        let (a, mut b) = duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn test_peer_close_mid_frame() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x04, 0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn test_max_payload_enforced() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x06, 0x00, 0x10, 0x00, 0x00]).await.unwrap();

        let mut decoder = FrameDecoder::with_max_payload(1024);
        let err = decoder.decode(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::PayloadTooLarge(0x0010_0000))
        ));
        assert!(matches!(
            decoder.decode(&mut b).await,
            Err(RelayError::Protocol(ProtocolError::Desynchronized))
        ));
    }

    #[tokio::test]
    async fn test_payload_larger_than_grow_step() {
        let (mut a, mut b) = duplex(8 * 1024);
        let payload = vec![0xAB; PAYLOAD_GROW_STEP * 2 + 17];
        let expected = payload.clone();

        tokio::spawn(async move {
            write_frame(&mut a, FrameType::Data, &payload).await.unwrap();
        });

        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.payload.len(), expected.len());
        assert_eq!(frame.payload, expected);
    }
}
