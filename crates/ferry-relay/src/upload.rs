//! Upload stream: inbound relay Data frames as an ordinary byte stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::client::{RelayStream, TransferOptions};
use crate::download::is_disconnect;
use crate::error::{ProtocolError, RelayError};
use crate::frame::{FrameDecoder, FrameType};

/// Receiving half of a registered upload.
///
/// Implements [`AsyncRead`]: reads drain the remainder of the last Data frame
/// before the next frame is pulled off the connection, so the relay is only
/// read as fast as the caller consumes. EOF from the relay ends the stream
/// for good; an Error frame fails the read with [`RelayError::Relay`]
/// (recover it with [`RelayError::from_io`]).
///
/// A failed read is terminal. Whatever the cause, the connection is not read
/// again and every later read returns [`RelayError::SessionClosed`].
#[derive(Debug)]
pub struct UploadStream<S = RelayStream> {
    conn: Option<S>,
    decoder: FrameDecoder,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    failed: bool,
    received: u64,
    options: TransferOptions,
}

impl<S> UploadStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an authenticated, registered connection
    pub fn new(conn: S, options: TransferOptions) -> Self {
        Self {
            conn: Some(conn),
            decoder: FrameDecoder::new(),
            buf: Vec::new(),
            pos: 0,
            eof: false,
            failed: false,
            received: 0,
            options,
        }
    }

    /// Bytes handed to the caller so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Whether the relay has signalled end of data
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Copy the whole upload into `sink`.
    ///
    /// With `max_bytes > 0`, an upload longer than the limit fails with
    /// [`RelayError::LimitExceeded`] before the excess reaches the sink.
    /// Returns the number of bytes written.
    pub async fn copy_to<W>(&mut self, sink: &mut W, max_bytes: u64) -> Result<u64, RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut chunk = vec![0u8; self.options.chunk_size.max(1)];
        let mut written: u64 = 0;
        loop {
            let n = self.read(&mut chunk).await.map_err(RelayError::from_io)?;
            if n == 0 {
                break;
            }
            if max_bytes > 0 && written + n as u64 > max_bytes {
                return Err(RelayError::LimitExceeded { limit: max_bytes });
            }
            sink.write_all(&chunk[..n]).await.map_err(RelayError::Local)?;
            written += n as u64;
        }
        sink.flush().await.map_err(RelayError::Local)?;
        Ok(written)
    }

    /// Shut down the relay connection. Calling this again is a no-op.
    pub async fn close(&mut self) -> Result<(), RelayError> {
        self.buf.clear();
        self.pos = 0;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match conn.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if is_disconnect(&err) => Ok(()),
            Err(err) => Err(RelayError::Connection(err)),
        }
    }
}

impl<S> AsyncRead for UploadStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.pos < this.buf.len() {
                let n = out.remaining().min(this.buf.len() - this.pos);
                out.put_slice(&this.buf[this.pos..this.pos + n]);
                this.pos += n;
                this.received += n as u64;
                return Poll::Ready(Ok(()));
            }
            if this.failed {
                return Poll::Ready(Err(RelayError::SessionClosed.into()));
            }
            if this.eof || out.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let Some(conn) = this.conn.as_mut() else {
                return Poll::Ready(Err(RelayError::SessionClosed.into()));
            };
            let frame = match ready!(this.decoder.poll_decode(cx, Pin::new(conn))) {
                Ok(frame) => frame,
                Err(err) => {
                    this.failed = true;
                    return Poll::Ready(Err(err.into()));
                }
            };
            match frame.frame_type {
                FrameType::Data => {
                    if this.options.debug {
                        tracing::debug!(
                            chunk = frame.payload.len(),
                            total = this.received,
                            "received data frame"
                        );
                    }
                    // a Data frame replaces the buffer entirely
                    this.buf = frame.payload;
                    this.pos = 0;
                }
                FrameType::Eof => {
                    if this.options.debug {
                        tracing::debug!(total = this.received, "received EOF");
                    }
                    this.eof = true;
                }
                FrameType::Error => {
                    this.failed = true;
                    return Poll::Ready(Err(RelayError::Relay(frame.text()).into()));
                }
                other => {
                    this.failed = true;
                    return Poll::Ready(Err(RelayError::Protocol(ProtocolError::UnexpectedFrame {
                        expected: "Data or EOF",
                        got: other,
                    })
                    .into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::write_frame;
    use tokio::io::{DuplexStream, duplex};

    fn stream(conn: DuplexStream) -> UploadStream<DuplexStream> {
        UploadStream::new(conn, TransferOptions::default())
    }

    #[tokio::test]
    async fn test_reads_across_frames_until_eof() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Data, b"hello ").await.unwrap();
            write_frame(&mut relay, FrameType::Data, b"").await.unwrap();
            write_frame(&mut relay, FrameType::Data, b"world").await.unwrap();
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut out = Vec::new();
        upload.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert!(upload.is_eof());
        assert_eq!(upload.received(), 11);

        // end of stream is sticky
        let mut byte = [0u8; 1];
        assert_eq!(upload.read(&mut byte).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_small_reads_drain_buffer_first() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Data, b"abcdef").await.unwrap();
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut two = [0u8; 2];
        upload.read_exact(&mut two).await.unwrap();
        assert_eq!(&two, b"ab");
        upload.read_exact(&mut two).await.unwrap();
        assert_eq!(&two, b"cd");

        let mut rest = Vec::new();
        upload.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"ef");
    }

    #[tokio::test]
    async fn test_relay_error_surfaces_reason() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Data, b"partial").await.unwrap();
            write_frame(&mut relay, FrameType::Error, b"peer disconnected").await.unwrap();
        });

        let mut upload = stream(client);
        let mut out = Vec::new();
        let err = upload.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(out, b"partial");
        assert!(matches!(
            RelayError::from_io(err),
            RelayError::Relay(r) if r == "peer disconnected"
        ));
    }

    #[tokio::test]
    async fn test_relay_error_ends_the_stream() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Error, b"boom").await.unwrap();
            write_frame(&mut relay, FrameType::Data, b"after-error").await.unwrap();
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut buf = [0u8; 64];
        let err = upload.read(&mut buf).await.unwrap_err();
        assert!(matches!(RelayError::from_io(err), RelayError::Relay(r) if r == "boom"));

        let err = upload.read(&mut buf).await.unwrap_err();
        assert!(matches!(RelayError::from_io(err), RelayError::SessionClosed));
        assert_eq!(upload.received(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_frame_is_protocol_error() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::PortAlloc, &[0, 0, 0x0F, 0xA1]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut out = Vec::new();
        let err = upload.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            RelayError::from_io(err),
            RelayError::Protocol(ProtocolError::UnexpectedFrame {
                got: FrameType::PortAlloc,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_protocol_error() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            relay.write_all(&[0xEE, 0, 0, 0, 0]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut out = Vec::new();
        let err = upload.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(
            RelayError::from_io(err),
            RelayError::Protocol(ProtocolError::UnknownFrameType(0xEE))
        ));
    }

    #[tokio::test]
    async fn test_no_data_after_protocol_error() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            // an unknown frame whose payload looks like a Data frame carrying "BAD"
            relay.write_all(&[0xEE, 0, 0, 0, 5, 0x04, 0, 0, 0, 3]).await.unwrap();
            relay.write_all(b"BAD").await.unwrap();
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut buf = [0u8; 16];
        let err = upload.read(&mut buf).await.unwrap_err();
        assert!(matches!(
            RelayError::from_io(err),
            RelayError::Protocol(ProtocolError::UnknownFrameType(0xEE))
        ));

        for _ in 0..2 {
            let err = upload.read(&mut buf).await.unwrap_err();
            assert!(matches!(RelayError::from_io(err), RelayError::SessionClosed));
        }
        assert_eq!(upload.received(), 0);
        assert!(!upload.is_eof());
    }

    #[tokio::test]
    async fn test_unexpected_frame_ends_the_stream() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::AuthOk, &[]).await.unwrap();
            write_frame(&mut relay, FrameType::Data, b"late").await.unwrap();
        });

        let mut upload = stream(client);
        let mut sink = Vec::new();
        assert!(matches!(
            upload.copy_to(&mut sink, 0).await,
            Err(RelayError::Protocol(_))
        ));
        assert!(matches!(
            upload.copy_to(&mut sink, 0).await,
            Err(RelayError::SessionClosed)
        ));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_before_eof_is_an_error() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Data, b"half a file").await.unwrap();
            drop(relay);
        });

        let mut upload = stream(client);
        let mut out = Vec::new();
        let err = upload.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(RelayError::from_io(err), RelayError::Closed));
        assert!(!upload.is_eof());
    }

    #[tokio::test]
    async fn test_copy_to_respects_limit() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            write_frame(&mut relay, FrameType::Data, &[1u8; 300]).await.unwrap();
            write_frame(&mut relay, FrameType::Data, &[2u8; 300]).await.unwrap();
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut sink = Vec::new();
        let err = upload.copy_to(&mut sink, 500).await.unwrap_err();
        assert!(matches!(err, RelayError::LimitExceeded { limit: 500 }));
        assert!(sink.len() <= 500);
    }

    #[tokio::test]
    async fn test_copy_to_unlimited() {
        let (client, mut relay) = duplex(1024);
        tokio::spawn(async move {
            for _ in 0..10 {
                write_frame(&mut relay, FrameType::Data, &[9u8; 100]).await.unwrap();
            }
            write_frame(&mut relay, FrameType::Eof, &[]).await.unwrap();
        });

        let mut upload = stream(client);
        let mut sink = Vec::new();
        assert_eq!(upload.copy_to(&mut sink, 0).await.unwrap(), 1000);
        assert_eq!(sink, vec![9u8; 1000]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_reads() {
        let (client, _relay) = duplex(1024);
        let mut upload = stream(client);
        upload.close().await.unwrap();
        upload.close().await.unwrap();

        let mut byte = [0u8; 1];
        let err = upload.read(&mut byte).await.unwrap_err();
        assert!(matches!(RelayError::from_io(err), RelayError::SessionClosed));
    }
}
