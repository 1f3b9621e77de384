//! Download session: stream a local byte source to the relay.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{RelayStream, TransferOptions};
use crate::error::RelayError;
use crate::frame::{FrameType, write_frame};

/// Sending half of a registered download.
///
/// Owns the authenticated relay connection. The connection is shut down by
/// [`DownloadSession::close`] (idempotent) or dropped with the session.
/// After a failed [`send_file`](DownloadSession::send_file) the connection may
/// hold a partial frame, so the session refuses further sends.
#[derive(Debug)]
pub struct DownloadSession<S = RelayStream> {
    conn: Option<S>,
    options: TransferOptions,
    sent: u64,
    finished: bool,
    failed: bool,
}

impl<S> DownloadSession<S>
where
    S: AsyncWrite + Unpin,
{
    /// Wrap an authenticated, registered connection
    pub fn new(conn: S, options: TransferOptions) -> Self {
        Self {
            conn: Some(conn),
            options,
            sent: 0,
            finished: false,
            failed: false,
        }
    }

    /// Stream `source` as Data frames, then one EOF frame.
    ///
    /// `max_bytes` is a hard cap (0 = unlimited): the last chunk is truncated
    /// and sending stops once the cap is reached. The caller validates the
    /// source's real size beforehand. A read or write error aborts without
    /// EOF, so the receiver sees the connection drop mid-stream.
    ///
    /// Returns the number of payload bytes sent. A session sends one file:
    /// once it has finished or failed, later calls return
    /// [`RelayError::SessionClosed`].
    pub async fn send_file<R>(&mut self, source: &mut R, max_bytes: u64) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.finished || self.failed {
            return Err(RelayError::SessionClosed);
        }
        let result = self.stream_chunks(source, max_bytes).await;
        match &result {
            Ok(_) => self.finished = true,
            Err(_) => self.failed = true,
        }
        result
    }

    async fn stream_chunks<R>(&mut self, source: &mut R, max_bytes: u64) -> Result<u64, RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let debug = self.options.debug;
        let conn = self.conn.as_mut().ok_or(RelayError::SessionClosed)?;
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut sent: u64 = 0;

        loop {
            if max_bytes > 0 && sent >= max_bytes {
                break;
            }
            let mut n = source.read(&mut buf).await.map_err(RelayError::Local)?;
            if n == 0 {
                break;
            }
            if max_bytes > 0 {
                n = n.min(usize::try_from(max_bytes - sent).unwrap_or(usize::MAX));
            }

            // write_frame copies the chunk into the frame buffer, so `buf` is
            // free for the next read once this returns
            write_frame(conn, FrameType::Data, &buf[..n]).await?;
            sent += n as u64;
            self.sent = sent;
            if debug {
                tracing::debug!(chunk = n, total = sent, "sent data frame");
            }
        }

        if debug {
            tracing::debug!(total = sent, "sending EOF");
        }
        write_frame(conn, FrameType::Eof, &[]).await?;
        Ok(sent)
    }

    /// Payload bytes sent so far
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Whether the EOF frame has been sent
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Shut down the relay connection. Calling this again is a no-op.
    pub async fn close(&mut self) -> Result<(), RelayError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match conn.shutdown().await {
            Ok(()) => Ok(()),
            // The relay hanging up first is a normal way for a session to end
            Err(err) if is_disconnect(&err) => Ok(()),
            Err(err) => Err(RelayError::Connection(err)),
        }
    }
}

pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
    )
}
