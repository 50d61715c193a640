//! Transport abstraction: TCP, TLS-wrapped TCP, or Unix domain socket.
//!
//! The driver needs only an ordered, reliable byte stream; everything above
//! this enum is transport-agnostic.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;

#[allow(clippy::large_enum_variant)]
pub enum PgStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl PgStream {
    /// Best-effort non-blocking write, used by Drop to send Terminate.
    pub(crate) fn try_write(&self, bytes: &[u8]) {
        match self {
            PgStream::Tcp(stream) => {
                let _ = stream.try_write(bytes);
            }
            // TLS framing needs an async write; the TCP close still
            // notifies the server.
            PgStream::Tls(_) => {}
            #[cfg(unix)]
            PgStream::Unix(stream) => {
                let _ = stream.try_write(bytes);
            }
        }
    }
}

impl AsyncRead for PgStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PgStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            PgStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            PgStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PgStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            PgStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            PgStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            PgStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PgStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            PgStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            PgStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PgStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            PgStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            PgStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
