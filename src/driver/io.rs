//! Buffered codec I/O.
//!
//! Reads accumulate into a single buffer with "need N more bytes"
//! semantics: the five-byte header is peeked, the declared length checked
//! against the configured maximum, and the frame split off zero-copy once
//! complete. Writes are buffered by the encoders and flushed once per
//! logical message sequence. Every await is bounded by `socket_timeout`;
//! a timeout or I/O error marks the connection broken.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::connection::Connection;
use crate::error::{PgError, PgResult};
use crate::protocol::BackendMessage;

impl Connection {
    /// Read the next backend message off the wire.
    pub(crate) async fn recv(&mut self) -> PgResult<BackendMessage> {
        loop {
            if self.read_buf.len() >= 5 {
                let declared = u32::from_be_bytes([
                    self.read_buf[1],
                    self.read_buf[2],
                    self.read_buf[3],
                    self.read_buf[4],
                ]) as usize;
                if declared < 4 {
                    self.mark_broken();
                    return Err(PgError::Protocol(format!(
                        "message length {} below minimum",
                        declared
                    )));
                }
                if declared > self.config.max_message_size {
                    self.mark_broken();
                    return Err(PgError::Protocol(format!(
                        "message length {} exceeds maximum {}",
                        declared, self.config.max_message_size
                    )));
                }
                if self.read_buf.len() >= declared + 1 {
                    let frame = self.read_buf.split_to(declared + 1);
                    let message = BackendMessage::decode(frame[0], &frame[5..]).map_err(|e| {
                        self.mark_broken();
                        PgError::Protocol(e)
                    })?;
                    tracing::trace!(tag = %message.tag(), len = declared, "recv");
                    return Ok(message);
                }
            }

            if self.read_buf.capacity() - self.read_buf.len() < 4096 {
                self.read_buf.reserve(super::connection::BUFFER_CAPACITY);
            }
            let result = tokio::time::timeout(
                self.config.socket_timeout,
                self.stream.read_buf(&mut self.read_buf),
            )
            .await;
            let read = match result {
                Err(_) => {
                    self.mark_broken();
                    return Err(PgError::Timeout);
                }
                Ok(Err(e)) => {
                    self.mark_broken();
                    return Err(PgError::Io(e));
                }
                Ok(Ok(read)) => read,
            };
            if read == 0 {
                self.mark_broken();
                return Err(PgError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    /// Flush everything buffered by the encoders as one write.
    pub(crate) async fn flush(&mut self) -> PgResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let result = tokio::time::timeout(self.config.socket_timeout, async {
            self.stream.write_all(&self.write_buf).await?;
            self.stream.flush().await
        })
        .await;
        self.write_buf.clear();
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.mark_broken();
                Err(PgError::Io(e))
            }
            Err(_) => {
                self.mark_broken();
                Err(PgError::Timeout)
            }
        }
    }
}
